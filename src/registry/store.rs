//! Persistence trait for the Function Registry + SyncEvent queue.
//!
//! A single trait covers both concerns because every registry mutation
//! must commit its SyncEvent in the same transaction — write-ahead
//! commitment is the contract. A single `rusqlite::Connection` behind a
//! `tokio::sync::Mutex` does all of an entity's related writes on it.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use crate::error::{RegistryError, SyncError};
use crate::registry::types::*;
use crate::sync::event::{Operation, SyncEvent, SyncStatistics, SyncStatus};
use crate::types::{EventId, HttpMethod};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_function(&self, schema: FunctionSchema) -> Result<(), RegistryError>;
    async fn get_function(&self, id: &str) -> Result<Option<FunctionSchema>, RegistryError>;
    async fn update_function(
        &self,
        id: &str,
        patch: FunctionPatch,
    ) -> Result<Option<FunctionSchema>, RegistryError>;
    async fn delete_function(&self, id: &str) -> Result<bool, RegistryError>;
    async fn list_functions(
        &self,
        filter: &ListFilter,
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError>;
    async fn search_functions(
        &self,
        text: &str,
        domain: Option<&str>,
        tags: &[String],
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError>;
    async fn record_usage(
        &self,
        id: &str,
        response_time_ms: f64,
        success: bool,
    ) -> Result<(), RegistryError>;
    async fn get_statistics(&self) -> Result<RegistryStatistics, RegistryError>;

    /// Claim up to `batch_size` reclaimable events, flipping them to `processing`
    /// atomically with respect to concurrent claimers, ordered by `created_at`.
    async fn claim_sync_events(&self, batch_size: usize) -> Result<Vec<SyncEvent>, SyncError>;
    async fn mark_synced(&self, event_id: EventId) -> Result<(), SyncError>;
    async fn mark_failed(&self, event_id: EventId, message: String) -> Result<(), SyncError>;
    async fn sync_statistics(&self) -> Result<SyncStatistics, SyncError>;
}

/// In-memory store — used by tests and for embedding without a filesystem.
pub struct InMemoryStore {
    functions: StdMutex<HashMap<String, FunctionSchema>>,
    events: StdMutex<Vec<SyncEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            functions: StdMutex::new(HashMap::new()),
            events: StdMutex::new(Vec::new()),
        }
    }

    fn log_event(
        events: &mut Vec<SyncEvent>,
        entity_id: &str,
        operation: Operation,
        old_snapshot: Option<serde_json::Value>,
        new_snapshot: Option<serde_json::Value>,
    ) {
        events.push(SyncEvent {
            event_id: EventId::new(),
            entity_type: "function".to_string(),
            entity_id: entity_id.to_string(),
            operation,
            old_snapshot,
            new_snapshot,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            synced_at: None,
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_function(&self, schema: FunctionSchema) -> Result<(), RegistryError> {
        let mut functions = self.functions.lock().unwrap();
        if functions.contains_key(&schema.function_id) {
            return Err(RegistryError::AlreadyExists(schema.function_id));
        }
        let snapshot = serde_json::to_value(&schema)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let id = schema.function_id.clone();
        functions.insert(id.clone(), schema);
        let mut events = self.events.lock().unwrap();
        Self::log_event(&mut events, &id, Operation::Insert, None, Some(snapshot));
        Ok(())
    }

    async fn get_function(&self, id: &str) -> Result<Option<FunctionSchema>, RegistryError> {
        Ok(self.functions.lock().unwrap().get(id).cloned())
    }

    async fn update_function(
        &self,
        id: &str,
        patch: FunctionPatch,
    ) -> Result<Option<FunctionSchema>, RegistryError> {
        let mut functions = self.functions.lock().unwrap();
        let Some(existing) = functions.get_mut(id) else {
            return Ok(None);
        };
        let old_snapshot = serde_json::to_value(&*existing).ok();
        apply_patch(existing, patch);
        existing.updated_at = Utc::now();
        let new_snapshot = serde_json::to_value(&*existing).ok();
        let updated = existing.clone();
        let mut events = self.events.lock().unwrap();
        Self::log_event(&mut events, id, Operation::Update, old_snapshot, new_snapshot);
        Ok(Some(updated))
    }

    async fn delete_function(&self, id: &str) -> Result<bool, RegistryError> {
        let mut functions = self.functions.lock().unwrap();
        let Some(removed) = functions.remove(id) else {
            return Ok(false);
        };
        let old_snapshot = serde_json::to_value(&removed).ok();
        let mut events = self.events.lock().unwrap();
        Self::log_event(&mut events, id, Operation::Delete, old_snapshot, None);
        Ok(true)
    }

    async fn list_functions(
        &self,
        filter: &ListFilter,
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        let functions = self.functions.lock().unwrap();
        let mut matched: Vec<FunctionSchema> = functions
            .values()
            .filter(|f| filter.category.as_deref().map_or(true, |c| f.category == c))
            .filter(|f| filter.deprecated.map_or(true, |d| f.deprecated == d))
            .filter(|f| filter.tags.iter().all(|t| f.tags.contains(t)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.function_id.cmp(&b.function_id));
        Ok(paginate(matched, page))
    }

    async fn search_functions(
        &self,
        text: &str,
        domain: Option<&str>,
        tags: &[String],
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        let needle = text.to_lowercase();
        let functions = self.functions.lock().unwrap();
        let mut matched: Vec<FunctionSchema> = functions
            .values()
            .filter(|f| {
                needle.is_empty()
                    || f.name.to_lowercase().contains(&needle)
                    || f.description.to_lowercase().contains(&needle)
                    || f.function_id.to_lowercase().contains(&needle)
            })
            .filter(|f| domain.map_or(true, |d| f.category == d))
            .filter(|f| tags.iter().all(|t| f.tags.contains(t)))
            .cloned()
            .collect();
        // Search ranking: call_count descending (spec.md §4.1).
        matched.sort_by(|a, b| b.usage.call_count.cmp(&a.usage.call_count));
        Ok(paginate(matched, page))
    }

    async fn record_usage(
        &self,
        id: &str,
        response_time_ms: f64,
        success: bool,
    ) -> Result<(), RegistryError> {
        let mut functions = self.functions.lock().unwrap();
        let Some(function) = functions.get_mut(id) else {
            return Err(RegistryError::NotFound(id.to_string()));
        };
        apply_usage_sample(&mut function.usage, response_time_ms, success);
        Ok(())
    }

    async fn get_statistics(&self) -> Result<RegistryStatistics, RegistryError> {
        let functions = self.functions.lock().unwrap();
        let mut stats = RegistryStatistics::default();
        for f in functions.values() {
            stats.total_functions += 1;
            if f.deprecated {
                stats.deprecated_functions += 1;
            }
            *stats.by_category.entry(f.category.clone()).or_insert(0) += 1;
            stats.total_calls += f.usage.call_count;
        }
        Ok(stats)
    }

    async fn claim_sync_events(&self, batch_size: usize) -> Result<Vec<SyncEvent>, SyncError> {
        let mut events = self.events.lock().unwrap();
        let mut claimed = Vec::new();
        let mut indices: Vec<usize> = (0..events.len())
            .filter(|&i| events[i].is_reclaimable())
            .collect();
        indices.sort_by_key(|&i| events[i].created_at);
        for i in indices.into_iter().take(batch_size) {
            events[i].sync_status = SyncStatus::Processing;
            events[i].processed_at = Some(Utc::now());
            claimed.push(events[i].clone());
        }
        Ok(claimed)
    }

    async fn mark_synced(&self, event_id: EventId) -> Result<(), SyncError> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or_else(|| SyncError::NotFound(event_id.to_string()))?;
        event.sync_status = SyncStatus::Synced;
        event.synced_at = Some(Utc::now());
        event.error_message = None;
        Ok(())
    }

    async fn mark_failed(&self, event_id: EventId, message: String) -> Result<(), SyncError> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or_else(|| SyncError::NotFound(event_id.to_string()))?;
        event.sync_status = SyncStatus::Failed;
        event.error_message = Some(SyncEvent::truncate_error(&message));
        event.retry_count += 1;
        Ok(())
    }

    async fn sync_statistics(&self) -> Result<SyncStatistics, SyncError> {
        let events = self.events.lock().unwrap();
        let mut stats = SyncStatistics::default();
        for e in events.iter() {
            stats.total_events += 1;
            match e.sync_status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Processing => stats.processing += 1,
                SyncStatus::Synced => stats.synced += 1,
                SyncStatus::Failed => {
                    stats.failed += 1;
                    if e.retry_count >= e.max_retries {
                        stats.failed_at_cap += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}

fn apply_patch(existing: &mut FunctionSchema, patch: FunctionPatch) {
    if let Some(v) = patch.name {
        existing.name = v;
    }
    if let Some(v) = patch.description {
        existing.description = v;
    }
    if let Some(v) = patch.category {
        existing.category = v;
    }
    if let Some(v) = patch.endpoint {
        existing.endpoint = v;
    }
    if let Some(v) = patch.http_method {
        existing.http_method = v;
    }
    if let Some(v) = patch.auth_required {
        existing.auth_required = v;
    }
    if let Some(v) = patch.parameters {
        existing.parameters = v;
    }
    if let Some(v) = patch.response_schema {
        existing.response_schema = Some(v);
    }
    if let Some(v) = patch.cache_ttl_seconds {
        existing.cache_ttl_seconds = v;
    }
    if let Some(v) = patch.timeout_seconds {
        existing.timeout_seconds = v;
    }
    if let Some(v) = patch.tags {
        existing.tags = v;
    }
    if let Some(v) = patch.deprecated {
        existing.deprecated = v;
    }
    existing.version += 1;
}

/// Running-average update shared by every `Store` implementation
/// (spec.md §4.1: `avg ← (avg·(n−1) + sample)/n`, `success_rate` all-time).
pub fn apply_usage_sample(usage: &mut UsageStats, response_time_ms: f64, success: bool) {
    let n = usage.call_count + 1;
    usage.avg_response_time_ms =
        (usage.avg_response_time_ms * usage.call_count as f64 + response_time_ms) / n as f64;
    let successes_before = usage.success_rate * usage.call_count as f64 / 100.0;
    let successes_after = successes_before + if success { 1.0 } else { 0.0 };
    usage.success_rate = successes_after / n as f64 * 100.0;
    usage.call_count = n;
    usage.last_called_at = Some(Utc::now());
}

fn paginate(items: Vec<FunctionSchema>, page: Pagination) -> Vec<FunctionSchema> {
    items.into_iter().skip(page.offset).take(page.limit).collect()
}

/// sqlite-backed relational store collaborator.
///
/// A single `rusqlite::Connection` behind a `tokio::sync::Mutex`, WAL
/// mode, schema created up front.
pub struct SqliteStore {
    conn: tokio::sync::Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(dsn: &str) -> Result<Self, RegistryError> {
        let conn = if dsn == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = std::path::Path::new(dsn).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(dsn)
        }
        .map_err(|e| RegistryError::Storage(e.to_string()))?;

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Self::init_schema(&conn)?;
        Ok(Self { conn: tokio::sync::Mutex::new(conn) })
    }

    pub fn default_path() -> std::path::PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        base.join("agentflow").join("registry.db")
    }

    fn init_schema(conn: &Connection) -> Result<(), RegistryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS functions (
                function_id TEXT PRIMARY KEY,
                json        TEXT NOT NULL,
                category    TEXT NOT NULL,
                call_count  INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS sync_events (
                event_id      TEXT PRIMARY KEY,
                entity_type   TEXT NOT NULL,
                entity_id     TEXT NOT NULL,
                operation     TEXT NOT NULL,
                old_snapshot  TEXT,
                new_snapshot  TEXT,
                sync_status   TEXT NOT NULL,
                retry_count   INTEGER NOT NULL DEFAULT 0,
                max_retries   INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                created_at    TEXT NOT NULL,
                processed_at  TEXT,
                synced_at     TEXT
            );",
        )
        .map_err(|e| RegistryError::Storage(e.to_string()))
    }

    fn log_event_tx(
        tx: &rusqlite::Transaction<'_>,
        entity_id: &str,
        operation: Operation,
        old_snapshot: Option<&serde_json::Value>,
        new_snapshot: Option<&serde_json::Value>,
    ) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT INTO sync_events
                (event_id, entity_type, entity_id, operation, old_snapshot, new_snapshot,
                 sync_status, retry_count, max_retries, error_message, created_at, processed_at, synced_at)
             VALUES (?1, 'function', ?2, ?3, ?4, ?5, 'pending', 0, 3, NULL, ?6, NULL, NULL)",
            params![
                EventId::new().to_string(),
                entity_id,
                operation.as_str(),
                old_snapshot.map(|v| v.to_string()),
                new_snapshot.map(|v| v.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_schema(json: String, call_count: i64) -> Result<FunctionSchema, RegistryError> {
        let mut schema: FunctionSchema =
            serde_json::from_str(&json).map_err(|e| RegistryError::Storage(e.to_string()))?;
        schema.usage.call_count = call_count as u64;
        Ok(schema)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_function(&self, schema: FunctionSchema) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock().await;
        let exists: Option<String> = conn
            .query_row(
                "SELECT function_id FROM functions WHERE function_id = ?1",
                params![schema.function_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        if exists.is_some() {
            return Err(RegistryError::AlreadyExists(schema.function_id));
        }
        let json = serde_json::to_string(&schema).map_err(|e| RegistryError::Storage(e.to_string()))?;
        let tx = conn.transaction().map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT INTO functions (function_id, json, category, call_count) VALUES (?1, ?2, ?3, 0)",
            params![schema.function_id, json, schema.category],
        )
        .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let snapshot = serde_json::to_value(&schema).ok();
        Self::log_event_tx(&tx, &schema.function_id, Operation::Insert, None, snapshot.as_ref())
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_function(&self, id: &str) -> Result<Option<FunctionSchema>, RegistryError> {
        let conn = self.conn.lock().await;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT json, call_count FROM functions WHERE function_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        row.map(|(json, count)| Self::row_to_schema(json, count)).transpose()
    }

    async fn update_function(
        &self,
        id: &str,
        patch: FunctionPatch,
    ) -> Result<Option<FunctionSchema>, RegistryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| RegistryError::Storage(e.to_string()))?;
        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT json, call_count FROM functions WHERE function_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let Some((json, call_count)) = existing else {
            return Ok(None);
        };
        let old_snapshot: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| RegistryError::Storage(e.to_string()))?;
        let mut schema = Self::row_to_schema(json, call_count)?;
        apply_patch(&mut schema, patch);
        schema.updated_at = Utc::now();
        let new_json =
            serde_json::to_string(&schema).map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.execute(
            "UPDATE functions SET json = ?1, category = ?2 WHERE function_id = ?3",
            params![new_json, schema.category, id],
        )
        .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let new_snapshot = serde_json::to_value(&schema).ok();
        Self::log_event_tx(&tx, id, Operation::Update, Some(&old_snapshot), new_snapshot.as_ref())
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(Some(schema))
    }

    async fn delete_function(&self, id: &str) -> Result<bool, RegistryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| RegistryError::Storage(e.to_string()))?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT json FROM functions WHERE function_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let Some(json) = existing else {
            return Ok(false);
        };
        let old_snapshot: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.execute("DELETE FROM functions WHERE function_id = ?1", params![id])
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        Self::log_event_tx(&tx, id, Operation::Delete, Some(&old_snapshot), None)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(true)
    }

    async fn list_functions(
        &self,
        filter: &ListFilter,
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT json, call_count, category FROM functions ORDER BY function_id")
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let mut matched = Vec::new();
        for row in rows {
            let (json, count) = row.map_err(|e| RegistryError::Storage(e.to_string()))?;
            let schema = Self::row_to_schema(json, count)?;
            if filter.category.as_deref().map_or(false, |c| c != schema.category) {
                continue;
            }
            if let Some(d) = filter.deprecated {
                if schema.deprecated != d {
                    continue;
                }
            }
            if !filter.tags.iter().all(|t| schema.tags.contains(t)) {
                continue;
            }
            matched.push(schema);
        }
        Ok(paginate(matched, page))
    }

    async fn search_functions(
        &self,
        text: &str,
        domain: Option<&str>,
        tags: &[String],
        page: Pagination,
    ) -> Result<Vec<FunctionSchema>, RegistryError> {
        let needle = text.to_lowercase();
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT json, call_count FROM functions")
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let mut matched = Vec::new();
        for row in rows {
            let (json, count) = row.map_err(|e| RegistryError::Storage(e.to_string()))?;
            let schema = Self::row_to_schema(json, count)?;
            let text_hit = needle.is_empty()
                || schema.name.to_lowercase().contains(&needle)
                || schema.description.to_lowercase().contains(&needle)
                || schema.function_id.to_lowercase().contains(&needle);
            if !text_hit {
                continue;
            }
            if domain.map_or(false, |d| d != schema.category) {
                continue;
            }
            if !tags.iter().all(|t| schema.tags.contains(t)) {
                continue;
            }
            matched.push(schema);
        }
        matched.sort_by(|a, b| b.usage.call_count.cmp(&a.usage.call_count));
        Ok(paginate(matched, page))
    }

    async fn record_usage(
        &self,
        id: &str,
        response_time_ms: f64,
        success: bool,
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| RegistryError::Storage(e.to_string()))?;
        let json: Option<String> = tx
            .query_row("SELECT json FROM functions WHERE function_id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let Some(json) = json else {
            return Err(RegistryError::NotFound(id.to_string()));
        };
        let mut schema: FunctionSchema =
            serde_json::from_str(&json).map_err(|e| RegistryError::Storage(e.to_string()))?;
        apply_usage_sample(&mut schema.usage, response_time_ms, success);
        let new_json =
            serde_json::to_string(&schema).map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.execute(
            "UPDATE functions SET json = ?1, call_count = ?2 WHERE function_id = ?3",
            params![new_json, schema.usage.call_count as i64, id],
        )
        .map_err(|e| RegistryError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_statistics(&self) -> Result<RegistryStatistics, RegistryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT json, call_count FROM functions")
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let mut stats = RegistryStatistics::default();
        for row in rows {
            let (json, count) = row.map_err(|e| RegistryError::Storage(e.to_string()))?;
            let schema: FunctionSchema =
                serde_json::from_str(&json).map_err(|e| RegistryError::Storage(e.to_string()))?;
            stats.total_functions += 1;
            if schema.deprecated {
                stats.deprecated_functions += 1;
            }
            *stats.by_category.entry(schema.category.clone()).or_insert(0) += 1;
            stats.total_calls += count as u64;
        }
        Ok(stats)
    }

    async fn claim_sync_events(&self, batch_size: usize) -> Result<Vec<SyncEvent>, SyncError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| SyncError::Storage(e.to_string()))?;
        let mut stmt = tx
            .prepare(
                "SELECT event_id FROM sync_events
                 WHERE sync_status = 'pending'
                    OR (sync_status = 'failed' AND retry_count < max_retries)
                 ORDER BY created_at ASC
                 LIMIT ?1",
            )
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let ids: Vec<String> = stmt
            .query_map(params![batch_size as i64], |row| row.get(0))
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        drop(stmt);
        let now = Utc::now().to_rfc3339();
        let mut claimed = Vec::new();
        for id in ids {
            tx.execute(
                "UPDATE sync_events SET sync_status = 'processing', processed_at = ?1 WHERE event_id = ?2",
                params![now, id],
            )
            .map_err(|e| SyncError::Storage(e.to_string()))?;
            let row = tx
                .query_row(
                    "SELECT event_id, entity_type, entity_id, operation, old_snapshot, new_snapshot,
                            sync_status, retry_count, max_retries, error_message, created_at, processed_at, synced_at
                     FROM sync_events WHERE event_id = ?1",
                    params![id],
                    row_to_event,
                )
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            claimed.push(row);
        }
        tx.commit().map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(claimed)
    }

    async fn mark_synced(&self, event_id: EventId) -> Result<(), SyncError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE sync_events SET sync_status = 'synced', synced_at = ?1, error_message = NULL
                 WHERE event_id = ?2",
                params![now, event_id.to_string()],
            )
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(SyncError::NotFound(event_id.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: EventId, message: String) -> Result<(), SyncError> {
        let conn = self.conn.lock().await;
        let truncated = SyncEvent::truncate_error(&message);
        let changed = conn
            .execute(
                "UPDATE sync_events SET sync_status = 'failed', error_message = ?1,
                    retry_count = retry_count + 1
                 WHERE event_id = ?2",
                params![truncated, event_id.to_string()],
            )
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(SyncError::NotFound(event_id.to_string()));
        }
        Ok(())
    }

    async fn sync_statistics(&self) -> Result<SyncStatistics, SyncError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT sync_status, retry_count, max_retries FROM sync_events")
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let mut stats = SyncStatistics::default();
        for row in rows {
            let (status, retry_count, max_retries) = row.map_err(|e| SyncError::Storage(e.to_string()))?;
            stats.total_events += 1;
            match SyncStatus::parse(&status) {
                Some(SyncStatus::Pending) => stats.pending += 1,
                Some(SyncStatus::Processing) => stats.processing += 1,
                Some(SyncStatus::Synced) => stats.synced += 1,
                Some(SyncStatus::Failed) => {
                    stats.failed += 1;
                    if retry_count >= max_retries {
                        stats.failed_at_cap += 1;
                    }
                }
                None => {}
            }
        }
        Ok(stats)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncEvent> {
    let event_id: String = row.get(0)?;
    let operation: String = row.get(3)?;
    let old_snapshot: Option<String> = row.get(4)?;
    let new_snapshot: Option<String> = row.get(5)?;
    let sync_status: String = row.get(6)?;
    let created_at: String = row.get(10)?;
    let processed_at: Option<String> = row.get(11)?;
    let synced_at: Option<String> = row.get(12)?;
    Ok(SyncEvent {
        event_id: EventId(uuid::Uuid::parse_str(&event_id).unwrap_or_default()),
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        operation: Operation::parse(&operation).unwrap_or(Operation::Insert),
        old_snapshot: old_snapshot.and_then(|s| serde_json::from_str(&s).ok()),
        new_snapshot: new_snapshot.and_then(|s| serde_json::from_str(&s).ok()),
        sync_status: SyncStatus::parse(&sync_status).unwrap_or(SyncStatus::Pending),
        retry_count: row.get::<_, i64>(7)? as u32,
        max_retries: row.get::<_, i64>(8)? as u32,
        error_message: row.get(9)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        processed_at: processed_at.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
        }),
        synced_at: synced_at.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::ParameterSchema;

    fn sample(id: &str) -> FunctionSchema {
        FunctionSchema {
            function_id: id.to_string(),
            name: "get_weather".to_string(),
            description: "Get current weather".to_string(),
            category: "weather".to_string(),
            endpoint: "https://api.example.com/weather".to_string(),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_get_delete_roundtrip_in_memory() {
        let store = InMemoryStore::new();
        store.create_function(sample("f1")).await.unwrap();
        assert!(store.get_function("f1").await.unwrap().is_some());
        assert!(store.delete_function("f1").await.unwrap());
        assert!(store.get_function("f1").await.unwrap().is_none());
        assert!(!store.delete_function("f1").await.unwrap());
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = InMemoryStore::new();
        store.create_function(sample("f1")).await.unwrap();
        let err = store.create_function(sample("f1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_logs_sync_event() {
        let store = InMemoryStore::new();
        store.create_function(sample("f1")).await.unwrap();
        let claimed = store.claim_sync_events(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].entity_id, "f1");
        assert!(matches!(claimed[0].operation, Operation::Insert));
    }

    #[tokio::test]
    async fn sqlite_store_roundtrip() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.create_function(sample("f1")).await.unwrap();
        let fetched = store.get_function("f1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "get_weather");
        let claimed = store.claim_sync_events(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        store.mark_synced(claimed[0].event_id).await.unwrap();
        let stats = store.sync_statistics().await.unwrap();
        assert_eq!(stats.synced, 1);
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let dsn = path.to_str().unwrap().to_string();

        {
            let store = SqliteStore::open(&dsn).unwrap();
            store.create_function(sample("f1")).await.unwrap();
        }

        let reopened = SqliteStore::open(&dsn).unwrap();
        let fetched = reopened.get_function("f1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "get_weather");
    }
}
