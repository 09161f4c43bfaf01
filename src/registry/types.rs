//! Data types owned by the Function Registry (C1).

use crate::types::HttpMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON-Schema-shaped description of one function parameter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "enum")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// A function's parameter schema: `properties` + `required`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterSchema {
    pub properties: HashMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Mutable usage counters updated by `Registry::record_usage`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsageStats {
    pub call_count: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Immutable-per-version function metadata (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub function_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub endpoint: String,
    pub http_method: HttpMethod,
    pub auth_required: bool,
    pub parameters: ParameterSchema,
    pub response_schema: Option<serde_json::Value>,
    pub cache_ttl_seconds: u64,
    pub timeout_seconds: u64,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub version: u32,
    #[serde(default)]
    pub usage: UsageStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patch applied by `update` — `None` fields are left untouched (merge semantics).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<HttpMethod>,
    pub auth_required: Option<bool>,
    pub parameters: Option<ParameterSchema>,
    pub response_schema: Option<serde_json::Value>,
    pub cache_ttl_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub deprecated: Option<bool>,
}

/// Filter used by `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub category: Option<String>,
    pub deprecated: Option<bool>,
    pub tags: Vec<String>,
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// Aggregate registry statistics (`get_statistics`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStatistics {
    pub total_functions: u64,
    pub deprecated_functions: u64,
    pub by_category: HashMap<String, u64>,
    pub total_calls: u64,
}

/// Outcome of `bulk_import`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkImportReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}
