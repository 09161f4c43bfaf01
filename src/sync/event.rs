//! SyncEvent type and lifecycle (spec.md §3, §4.2).

use crate::types::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Operation::Insert),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Processing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "processing" => Some(SyncStatus::Processing),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// A durable record of a registry mutation (application-level CDC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub event_id: EventId,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub old_snapshot: Option<serde_json::Value>,
    pub new_snapshot: Option<serde_json::Value>,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncEvent {
    /// Truncate an error message to the 1000-char cap.
    pub fn truncate_error(message: &str) -> String {
        if message.len() <= 1000 {
            message.to_string()
        } else {
            message.chars().take(1000).collect()
        }
    }

    /// Whether this event is eligible for another processing attempt.
    pub fn is_reclaimable(&self) -> bool {
        match self.sync_status {
            SyncStatus::Pending => true,
            SyncStatus::Failed => self.retry_count < self.max_retries,
            SyncStatus::Processing | SyncStatus::Synced => false,
        }
    }
}

/// Aggregate statistics over the SyncEvent queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total_events: u64,
    pub pending: u64,
    pub processing: u64,
    pub synced: u64,
    pub failed: u64,
    pub failed_at_cap: u64,
}
