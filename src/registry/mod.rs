//! Function Registry (C1) — authoritative CRUD over function metadata,
//! backed by a transactional store with a companion sync-event log.

pub mod cache;
pub mod store;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::RegistryError;
pub use crate::sync::event::{SyncEvent, SyncStatistics};
pub use store::Store;
pub use types::*;

/// Authoritative registry service: `Store` + read-through cache.
pub struct Registry {
    store: Arc<dyn Store>,
    cache: cache::FunctionCache,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, cache: cache::FunctionCache::new(Duration::from_secs(30)) }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(store::InMemoryStore::new()))
    }

    pub async fn create(&self, schema: FunctionSchema) -> Result<(), RegistryError> {
        info!(function_id = %schema.function_id, "creating function");
        self.store.create_function(schema.clone()).await?;
        self.cache.put(schema);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<FunctionSchema>, RegistryError> {
        if let Some(cached) = self.cache.get(id) {
            debug!(function_id = id, "registry cache hit");
            return Ok(Some(cached));
        }
        let fetched = self.store.get_function(id).await?;
        if let Some(ref schema) = fetched {
            self.cache.put(schema.clone());
        }
        Ok(fetched)
    }

    pub async fn update(
        &self,
        id: &str,
        patch: FunctionPatch,
    ) -> Result<Option<FunctionSchema>, RegistryError> {
        let updated = self.store.update_function(id, patch).await?;
        self.cache.invalidate(id);
        if let Some(ref schema) = updated {
            self.cache.put(schema.clone());
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let deleted = self.store.delete_function(id).await?;
        self.cache.invalidate(id);
        Ok(deleted)
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        self.store.list_functions(filter, page).await
    }

    pub async fn search(
        &self,
        text: &str,
        domain: Option<&str>,
        tags: &[String],
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        self.store.search_functions(text, domain, tags, page).await
    }

    /// Import many schemas, optionally overwriting existing ids.
    pub async fn bulk_import(
        &self,
        items: Vec<FunctionSchema>,
        overwrite: bool,
    ) -> Result<BulkImportReport, RegistryError> {
        let mut report = BulkImportReport::default();
        for item in items {
            let id = item.function_id.clone();
            match self.store.get_function(&id).await {
                Ok(Some(_)) if !overwrite => {
                    report.skipped += 1;
                }
                Ok(Some(_)) => {
                    let patch = FunctionPatch {
                        name: Some(item.name.clone()),
                        description: Some(item.description.clone()),
                        category: Some(item.category.clone()),
                        endpoint: Some(item.endpoint.clone()),
                        http_method: Some(item.http_method),
                        auth_required: Some(item.auth_required),
                        parameters: Some(item.parameters.clone()),
                        response_schema: item.response_schema.clone(),
                        cache_ttl_seconds: Some(item.cache_ttl_seconds),
                        timeout_seconds: Some(item.timeout_seconds),
                        tags: Some(item.tags.clone()),
                        deprecated: Some(item.deprecated),
                    };
                    match self.store.update_function(&id, patch).await {
                        Ok(_) => {
                            self.cache.invalidate(&id);
                            report.updated += 1;
                        }
                        Err(e) => report.errors.push(format!("{id}: {e}")),
                    }
                }
                Ok(None) => match self.store.create_function(item).await {
                    Ok(()) => report.created += 1,
                    Err(e) => report.errors.push(format!("{id}: {e}")),
                },
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }
        Ok(report)
    }

    /// Record a completed call's latency and outcome (spec.md §4.1).
    pub async fn record_usage(
        &self,
        function_id: &str,
        response_time_ms: f64,
        success: bool,
    ) -> Result<(), RegistryError> {
        self.store.record_usage(function_id, response_time_ms, success).await?;
        self.cache.invalidate(function_id);
        if !success {
            warn!(function_id, "recorded failed call");
        }
        Ok(())
    }

    pub async fn get_statistics(&self) -> Result<RegistryStatistics, RegistryError> {
        self.store.get_statistics().await
    }

    /// Access to the shared `Store` for the sync worker (C2), which needs
    /// the same connection to claim/settle SyncEvents transactionally.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpMethod;

    fn sample(id: &str) -> FunctionSchema {
        FunctionSchema {
            function_id: id.to_string(),
            name: "get_weather".to_string(),
            description: "Get current weather for a location".to_string(),
            category: "weather".to_string(),
            endpoint: "https://api.example.com/weather".to_string(),
            http_method: HttpMethod::Get,
            auth_required: false,
            parameters: ParameterSchema::default(),
            response_schema: None,
            cache_ttl_seconds: 60,
            timeout_seconds: 10,
            tags: vec!["weather".to_string()],
            deprecated: false,
            version: 1,
            usage: UsageStats::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_get_delete_get_roundtrip() {
        let registry = Registry::in_memory();
        registry.create(sample("get_weather")).await.unwrap();
        assert!(registry.get("get_weather").await.unwrap().is_some());
        assert!(registry.delete("get_weather").await.unwrap());
        assert!(registry.get("get_weather").await.unwrap().is_none());
        assert!(!registry.delete("get_weather").await.unwrap());
    }

    #[tokio::test]
    async fn record_usage_updates_running_average() {
        let registry = Registry::in_memory();
        registry.create(sample("get_weather")).await.unwrap();
        registry.record_usage("get_weather", 100.0, true).await.unwrap();
        registry.record_usage("get_weather", 200.0, false).await.unwrap();
        let schema = registry.get("get_weather").await.unwrap().unwrap();
        assert_eq!(schema.usage.call_count, 2);
        assert!((schema.usage.avg_response_time_ms - 150.0).abs() < 1e-9);
        assert!((schema.usage.success_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_orders_by_call_count_desc() {
        let registry = Registry::in_memory();
        registry.create(sample("a")).await.unwrap();
        registry.create({ let mut f = sample("b"); f.name = "get_news".into(); f }).await.unwrap();
        registry.record_usage("a", 10.0, true).await.unwrap();
        for _ in 0..3 {
            registry.record_usage("b", 10.0, true).await.unwrap();
        }
        let results = registry
            .search("", None, &[], Pagination::default())
            .await
            .unwrap();
        assert_eq!(results[0].function_id, "b");
    }
}
