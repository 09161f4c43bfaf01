//! `AgentRunState` — the ephemeral per-query state the ReAct Controller
//! (C8) owns for the lifetime of one `run` call (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::quality::QualityReport;
use crate::rag::RetrievedFunction;
use crate::selector::SelectionMethod;
use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Thinking,
    Acting,
    Observing,
    Reflecting,
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step: u32,
    pub function_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub step: u32,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub step: u32,
    pub parsed_quality: f64,
    pub objective_quality: f64,
    pub should_continue: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunState {
    pub user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub query: String,
    pub max_steps: u32,
    pub current_step: u32,

    pub thoughts: Vec<String>,
    pub actions: Vec<ActionRecord>,
    pub observations: Vec<ObservationRecord>,
    pub reflections: Vec<ReflectionRecord>,

    pub retrieved_functions: Vec<RetrievedFunction>,
    pub selection_method: Option<SelectionMethod>,
    pub selection_confidence: f64,

    pub quality_score: f64,
    pub quality_details: Option<QualityReport>,

    pub status: RunStatus,
    pub final_answer: Option<String>,
    pub total_execution_time_ms: u64,
    pub api_calls_made: u32,
    pub error: Option<String>,
}

impl AgentRunState {
    pub fn new(user_id: UserId, conversation_id: Option<ConversationId>, query: String, max_steps: u32) -> Self {
        Self {
            user_id,
            conversation_id,
            query,
            max_steps,
            current_step: 0,
            thoughts: Vec::new(),
            actions: Vec::new(),
            observations: Vec::new(),
            reflections: Vec::new(),
            retrieved_functions: Vec::new(),
            selection_method: None,
            selection_confidence: 0.0,
            quality_score: 0.0,
            quality_details: None,
            status: RunStatus::Thinking,
            final_answer: None,
            total_execution_time_ms: 0,
            api_calls_made: 0,
            error: None,
        }
    }

    pub fn successful_observations(&self) -> usize {
        self.observations.iter().filter(|o| o.success).count()
    }
}
