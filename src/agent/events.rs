//! Streamed step events (spec.md §4.8) — delivered best-effort over a
//! bounded channel so a slow consumer cannot deadlock the controller.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::state::RunStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    Start { query: String },
    Thought { step: u32, content: String },
    Action { step: u32, function_name: String, parameters: serde_json::Value },
    Observation { step: u32, success: bool, data: Option<serde_json::Value>, error: Option<String> },
    FinalAnswer { content: String },
    Complete { status: RunStatus, quality_score: f64 },
    Error { message: String },
}

pub type StepSender = mpsc::Sender<StepEvent>;

/// Best-effort send with a wall-clock timeout; a blocked or closed
/// consumer is logged and otherwise ignored.
pub async fn emit(tx: &Option<StepSender>, timeout: std::time::Duration, event: StepEvent) {
    let Some(tx) = tx else { return };
    match tokio::time::timeout(timeout, tx.send(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!("step event receiver dropped"),
        Err(_) => debug!("step event send timed out; dropping event"),
    }
}
