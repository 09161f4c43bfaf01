//! CDC worker: drains the SyncEvent queue and projects mutations into the
//! vector index (spec.md §4.2), following a poll-claim-dispatch-settle
//! shape for each batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::rag::Indexer;
use crate::registry::store::Store;
use crate::registry::types::FunctionSchema;
use crate::sync::event::{Operation, SyncEvent, SyncStatistics};

/// Drains the SyncEvent queue against a `Store` + `Indexer` pair.
pub struct SyncWorker {
    store: Arc<dyn Store>,
    indexer: Arc<dyn Indexer>,
}

/// Outcome of one `process_batch` call.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
}

impl SyncWorker {
    pub fn new(store: Arc<dyn Store>, indexer: Arc<dyn Indexer>) -> Self {
        Self { store, indexer }
    }

    /// Claim up to `batch_size` reclaimable events and dispatch each by
    /// operation. Distinct `entity_id`s may run concurrently; this
    /// implementation processes the claimed batch sequentially, which is
    /// sufficient to satisfy per-`entity_id` ordering since a single claim
    /// call already orders by `created_at` and a given `entity_id`'s prior
    /// event must reach a terminal state before a later one on the same id
    /// becomes reclaimable in the first place.
    pub async fn process_batch(&self, batch_size: usize) -> Result<BatchReport, SyncError> {
        let events = self.store.claim_sync_events(batch_size).await?;
        let mut report = BatchReport { total_processed: events.len(), ..Default::default() };
        for event in events {
            match self.process_one(&event).await {
                Ok(()) => {
                    self.store.mark_synced(event.event_id).await?;
                    report.successful += 1;
                    info!(event_id = %event.event_id, entity_id = %event.entity_id, "sync event applied");
                }
                Err(e) => {
                    self.store.mark_failed(event.event_id, e.to_string()).await?;
                    report.failed += 1;
                    warn!(event_id = %event.event_id, entity_id = %event.entity_id, error = %e, "sync event failed");
                }
            }
        }
        Ok(report)
    }

    /// Run `process_batch` on an interval until cancelled.
    pub async fn run_forever(self: Arc<Self>, batch_size: usize, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.process_batch(batch_size).await {
                Ok(report) if report.total_processed > 0 => {
                    info!(
                        processed = report.total_processed,
                        successful = report.successful,
                        failed = report.failed,
                        "sync batch drained"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "sync batch failed to claim events"),
            }
        }
    }

    async fn process_one(&self, event: &SyncEvent) -> Result<(), SyncError> {
        if event.entity_type != "function" {
            // Other entity types are accepted by the queue but produce a
            // no-op dispatch.
            return Ok(());
        }
        match event.operation {
            Operation::Insert => {
                let schema = self.snapshot_to_schema(event.new_snapshot.as_ref())?;
                self.indexer
                    .index(&schema)
                    .await
                    .map_err(|e| SyncError::Processing(e.to_string()))
            }
            Operation::Update => {
                let schema = self.snapshot_to_schema(event.new_snapshot.as_ref())?;
                // Best-effort delete; a miss is not an error (spec.md §4.2).
                let _ = self.indexer.delete(&event.entity_id).await;
                self.indexer
                    .index(&schema)
                    .await
                    .map_err(|e| SyncError::Processing(e.to_string()))
            }
            Operation::Delete => {
                let _ = self.indexer.delete(&event.entity_id).await;
                Ok(())
            }
        }
    }

    fn snapshot_to_schema(
        &self,
        snapshot: Option<&serde_json::Value>,
    ) -> Result<FunctionSchema, SyncError> {
        let snapshot = snapshot.ok_or_else(|| SyncError::Processing("no data to index".to_string()))?;
        serde_json::from_value(snapshot.clone())
            .map_err(|e| SyncError::Processing(format!("invalid snapshot: {e}")))
    }

    pub async fn statistics(&self) -> Result<SyncStatistics, SyncError> {
        self.store.sync_statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::vector_store::InMemoryVectorIndex;
    use crate::rag::embedding::HashEmbedder;
    use crate::rag::RagEngine;
    use crate::registry::store::InMemoryStore;
    use crate::registry::types::{ParameterSchema, UsageStats};
    use crate::types::HttpMethod;
    use std::sync::Arc;

    fn sample(id: &str) -> FunctionSchema {
        FunctionSchema {
            function_id: id.to_string(),
            name: "get_weather".to_string(),
            description: "weather lookup".to_string(),
            category: "weather".to_string(),
            endpoint: "https://x/weather".to_string(),
            http_method: HttpMethod::Get,
            auth_required: false,
            parameters: ParameterSchema::default(),
            response_schema: None,
            cache_ttl_seconds: 60,
            timeout_seconds: 10,
            tags: vec![],
            deprecated: false,
            version: 1,
            usage: UsageStats::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_delete_leaves_no_vector() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let engine = Arc::new(RagEngine::new(Arc::new(HashEmbedder::new(16)), Arc::new(InMemoryVectorIndex::new())));
        let worker = SyncWorker::new(store.clone(), engine.clone());

        store.create_function(sample("f1")).await.unwrap();
        let report = worker.process_batch(10).await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(engine.vector_count().await, 1);

        store.delete_function("f1").await.unwrap();
        let report = worker.process_batch(10).await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(engine.vector_count().await, 0);
    }

    #[tokio::test]
    async fn replaying_an_event_is_idempotent() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let engine = Arc::new(RagEngine::new(Arc::new(HashEmbedder::new(16)), Arc::new(InMemoryVectorIndex::new())));
        let worker = SyncWorker::new(store.clone(), engine.clone());
        let schema = sample("f1");
        let snapshot = serde_json::to_value(&schema).unwrap();
        let event = SyncEvent {
            event_id: crate::types::EventId::new(),
            entity_type: "function".to_string(),
            entity_id: "f1".to_string(),
            operation: Operation::Insert,
            old_snapshot: None,
            new_snapshot: Some(snapshot),
            sync_status: crate::sync::event::SyncStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: chrono::Utc::now(),
            processed_at: None,
            synced_at: None,
        };
        worker.process_one(&event).await.unwrap();
        worker.process_one(&event).await.unwrap();
        assert_eq!(engine.vector_count().await, 1);
    }
}
