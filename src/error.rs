//! Error taxonomy for the agent runtime.
//!
//! Each subsystem owns a narrow error enum; [`AgentError`] composes them
//! into the single error type that crosses subsystem boundaries.

use thiserror::Error;

/// Top-level error type returned by public APIs.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("sync pipeline error: {0}")]
    Sync(#[from] SyncError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),
}

/// Function Registry (C1) errors.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("function already exists: {0}")]
    AlreadyExists(String),

    #[error("function not found: {0}")]
    NotFound(String),

    #[error("schema validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Sync Pipeline (C2) errors.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// RAG Retriever (C3) errors.
#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    #[error("embedder error: {0}")]
    Embedder(String),

    #[error("vector index error: {0}")]
    VectorIndex(String),

    #[error("retrieval timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Hybrid Selector (C4) errors.
#[derive(Error, Debug, Clone)]
pub enum SelectionError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("llm reasoning failed: {0}")]
    Llm(String),

    #[error("could not parse llm candidate list: {0}")]
    Parse(String),
}

/// Parameter Synthesizer (C5) errors.
#[derive(Error, Debug, Clone)]
pub enum SynthesisError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no strategy produced valid parameters")]
    Exhausted,

    #[error("llm generation failed: {0}")]
    Llm(String),

    #[error("could not parse llm parameters: {0}")]
    Parse(String),
}

/// Retry Executor (C6) errors, classified by kind (spec §7).
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("function not found: {0}")]
    NotFound(String),

    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("network/transport error: {0}")]
    Network(String),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("unresolved template reference: {0}")]
    UnresolvedReference(String),
}

impl ExecutionError {
    /// Whether this kind of failure is eligible for another retry attempt (spec §4.6 / §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. } | ExecutionError::Network(_))
    }

    /// Stable machine-readable error-kind tag, used by `AgentRunState`/tests.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::NotFound(_) => "NotFound",
            ExecutionError::Timeout { .. } => "Timeout",
            ExecutionError::Network(_) => "Network",
            ExecutionError::HttpStatus { .. } => "HTTPStatus",
            ExecutionError::Authentication(_) => "Authentication",
            ExecutionError::Permission(_) => "Permission",
            ExecutionError::UnresolvedReference(_) => "ValidationError",
        }
    }
}

/// ReAct Controller (C8) errors.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    #[error("context build failed: {0}")]
    Context(String),

    #[error("llm call failed: {0}")]
    Llm(String),
}
