//! Retry Executor (C6) — dispatches a chosen function through an HTTP
//! collaborator with classified retry, timeout, and request-cache
//! semantics (spec.md §4.6), using an exponential-backoff retry loop
//! generalized from job retries to per-call retries here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::registry::Registry;

const MAX_ATTEMPTS: u32 = 3;

/// Outcome of one `execute` call — always returned, never an `Err`, so
/// that a single call's failure can be folded into `AgentRunState` without
/// unwinding the controller (spec.md §4.6/§7).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub attempts: u32,
    pub execution_time_ms: u64,
    pub cached: bool,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    fn cached_hit(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_type: None,
            attempts: 0,
            execution_time_ms: 0,
            cached: true,
            status_code: None,
            timestamp: Utc::now(),
        }
    }

    fn failure(error: ExecutionError, attempts: u32, elapsed: Duration, status_code: Option<u16>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_type: Some(error.kind().to_string()),
            attempts,
            execution_time_ms: elapsed.as_millis() as u64,
            cached: false,
            status_code,
            timestamp: Utc::now(),
        }
    }

    fn success(data: Value, attempts: u32, elapsed: Duration, status_code: u16) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_type: None,
            attempts,
            execution_time_ms: elapsed.as_millis() as u64,
            cached: false,
            status_code: Some(status_code),
            timestamp: Utc::now(),
        }
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

pub struct RetryExecutor {
    registry: Arc<Registry>,
    client: reqwest::Client,
    cache: DashMap<String, CacheEntry>,
    app_name: String,
    app_version: String,
    bearer_token: Option<String>,
}

impl RetryExecutor {
    pub fn new(
        registry: Arc<Registry>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            cache: DashMap::new(),
            app_name: app_name.into(),
            app_version: app_version.into(),
            bearer_token,
        }
    }

    fn cache_key(function_id: &str, parameters: &HashMap<String, Value>) -> String {
        let mut keys: Vec<&String> = parameters.keys().collect();
        keys.sort();
        let canonical: Vec<(String, &Value)> =
            keys.into_iter().map(|k| (k.clone(), &parameters[k])).collect();
        let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(function_id.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical_json.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn execute(
        &self,
        function_id: &str,
        parameters: HashMap<String, Value>,
        use_cache: bool,
    ) -> ExecutionResult {
        let started = Instant::now();

        let schema = match self.registry.get(function_id).await {
            Ok(Some(schema)) => schema,
            Ok(None) => {
                return ExecutionResult::failure(
                    ExecutionError::NotFound(function_id.to_string()),
                    0,
                    started.elapsed(),
                    None,
                );
            }
            Err(e) => {
                return ExecutionResult::failure(
                    ExecutionError::NotFound(e.to_string()),
                    0,
                    started.elapsed(),
                    None,
                );
            }
        };
        if schema.deprecated {
            warn!(function_id, "calling deprecated function");
        }

        let key = Self::cache_key(function_id, &parameters);
        if use_cache && schema.cache_ttl_seconds > 0 {
            if let Some(entry) = self.cache.get(&key) {
                if !entry.is_expired() {
                    return ExecutionResult::cached_hit(entry.value.clone());
                }
            }
        }

        let mut last_error = ExecutionError::Timeout { attempts: 0 };
        let mut status_code = None;
        let mut attempts = 0u32;
        while attempts < MAX_ATTEMPTS {
            attempts += 1;
            match self.dispatch_once(&schema, &parameters).await {
                Ok((data, status)) => {
                    let elapsed = started.elapsed();
                    self.registry.record_usage(function_id, elapsed.as_millis() as f64, true).await.ok();
                    if use_cache && schema.cache_ttl_seconds > 0 {
                        self.cache.insert(
                            key,
                            CacheEntry {
                                value: data.clone(),
                                inserted_at: Instant::now(),
                                ttl: Duration::from_secs(schema.cache_ttl_seconds),
                            },
                        );
                    }
                    info!(function_id, attempts, "execution succeeded");
                    return ExecutionResult::success(data, attempts, elapsed, status);
                }
                Err(e) => {
                    status_code = e.status_code();
                    let retryable = e.is_retryable() && attempts < MAX_ATTEMPTS;
                    last_error = e;
                    if !retryable {
                        break;
                    }
                    let backoff = Duration::from_secs(1u64 << (attempts - 1));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let elapsed = started.elapsed();
        self.registry.record_usage(function_id, elapsed.as_millis() as f64, false).await.ok();
        warn!(function_id, attempts, error = %last_error, "execution failed");
        ExecutionResult::failure(last_error, attempts, elapsed, status_code)
    }

    async fn dispatch_once(
        &self,
        schema: &crate::registry::types::FunctionSchema,
        parameters: &HashMap<String, Value>,
    ) -> Result<(Value, u16), ExecutionError> {
        let mut request = self
            .client
            .request(schema.http_method.as_reqwest(), &schema.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", format!("{}/{}", self.app_name, self.app_version))
            .timeout(Duration::from_secs(schema.timeout_seconds));

        if schema.auth_required {
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            } else {
                return Err(ExecutionError::Authentication("no credential configured".to_string()));
            }
        }

        request = if schema.http_method.sends_query_string() {
            request.query(&flatten_query(parameters))
        } else {
            request.json(parameters)
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout { attempts: 1 }
            } else {
                ExecutionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::HttpStatus { status: status.as_u16(), body });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::Network(format!("invalid response body: {e}")))?;
        Ok((data, status.as_u16()))
    }

    /// Run independent calls concurrently; no ordering guarantee.
    pub async fn execute_parallel(
        &self,
        calls: Vec<(String, String, HashMap<String, Value>)>,
    ) -> Vec<(String, ExecutionResult)> {
        let futures = calls.into_iter().map(|(call_id, function_id, parameters)| async move {
            let result = self.execute(&function_id, parameters, true).await;
            (call_id, result)
        });
        futures::future::join_all(futures).await
    }

    /// Run calls in order, resolving `"{{call_id.dot.path}}"` references
    /// against prior calls' returned data before dispatch.
    pub async fn execute_sequential(
        &self,
        calls: Vec<(String, String, HashMap<String, Value>)>,
    ) -> Vec<(String, ExecutionResult)> {
        let mut results: Vec<(String, ExecutionResult)> = Vec::with_capacity(calls.len());
        for (call_id, function_id, parameters) in calls {
            let resolved = match resolve_templates(&parameters, &results) {
                Ok(p) => p,
                Err(e) => {
                    results.push((
                        call_id,
                        ExecutionResult::failure(e, 0, Duration::from_millis(0), None),
                    ));
                    continue;
                }
            };
            let result = self.execute(&function_id, resolved, true).await;
            results.push((call_id, result));
        }
        results
    }
}

impl ExecutionError {
    fn status_code(&self) -> Option<u16> {
        match self {
            ExecutionError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn flatten_query(parameters: &HashMap<String, Value>) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

fn resolve_templates(
    parameters: &HashMap<String, Value>,
    prior: &[(String, ExecutionResult)],
) -> Result<HashMap<String, Value>, ExecutionError> {
    let mut resolved = HashMap::with_capacity(parameters.len());
    for (key, value) in parameters {
        let resolved_value = match value.as_str() {
            Some(s) if s.starts_with("{{") && s.ends_with("}}") => {
                let reference = &s[2..s.len() - 2];
                resolve_reference(reference, prior)?
            }
            _ => value.clone(),
        };
        resolved.insert(key.clone(), resolved_value);
    }
    Ok(resolved)
}

fn resolve_reference(reference: &str, prior: &[(String, ExecutionResult)]) -> Result<Value, ExecutionError> {
    let mut parts = reference.split('.');
    let call_id = parts.next().ok_or_else(|| ExecutionError::UnresolvedReference(reference.to_string()))?;
    let (_, result) = prior
        .iter()
        .find(|(id, _)| id == call_id)
        .ok_or_else(|| ExecutionError::UnresolvedReference(reference.to_string()))?;
    let mut current = result
        .data
        .as_ref()
        .ok_or_else(|| ExecutionError::UnresolvedReference(reference.to_string()))?;
    for part in parts {
        current = current
            .get(part)
            .ok_or_else(|| ExecutionError::UnresolvedReference(reference.to_string()))?;
    }
    Ok(current.clone())
}
