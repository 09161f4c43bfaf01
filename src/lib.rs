//! agentflow-core: a tool-using conversational agent runtime.
//!
//! Three tightly coupled subsystems (spec.md §1):
//!
//! - the ReAct control loop ([`agent`]) — Think/Act/Observe/Reflect with
//!   bounded iteration, quality gating, and step streaming;
//! - hybrid function retrieval ([`selector`], [`rag`]) and parameter
//!   synthesis ([`synth`]);
//! - the CDC sync pipeline ([`sync`]) that keeps the vector index
//!   ([`rag::vector_store`]) eventually consistent with the Function
//!   Registry ([`registry`]).
//!
//! [`AgentRuntime`] wires these into one process-level facade, the way the
//! teacher's own `AgentRuntime` bundles its subsystems behind `Arc<dyn
//! Trait>` fields constructed from one `Config`.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod llm;
pub mod quality;
pub mod rag;
pub mod registry;
pub mod selector;
pub mod sync;
pub mod synth;
pub mod types;

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use tracing::info;

pub use agent::{ReactController, StepEvent, StepSender};
pub use config::Config;
pub use context::ContextBuilder;
pub use error::AgentError;
pub use executor::RetryExecutor;
pub use llm::InferenceProvider;
pub use rag::{Embedder, RagEngine};
pub use registry::Registry;
pub use selector::HybridSelector;
pub use sync::SyncWorker;

use crate::config::LlmProvider;
use crate::context::InMemoryContextStore;
use crate::llm::{CloudInferenceProvider, MockInferenceProvider};
use crate::rag::{HashEmbedder, InMemoryVectorIndex};
use crate::registry::store::{SqliteStore, Store};

/// How frequently the background CDC worker drains the SyncEvent queue
/// when driven by [`AgentRuntime::spawn_sync_worker`].
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_SYNC_BATCH_SIZE: usize = 50;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing-subscriber` `fmt` subscriber honoring `RUST_LOG`,
/// the way a host binary would initialize logging at process start.
/// Safe to call more than once — only the
/// first call takes effect, so host binaries and this crate's own
/// integration tests can both call it without fighting over the global
/// subscriber.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

/// Process-wide facade bundling the Function Registry (C1), Sync Pipeline
/// (C2), RAG Retriever (C3), Hybrid Selector (C4), Parameter Synthesizer
/// (C5, invoked internally by the controller), Retry Executor (C6),
/// Quality Validator (C7, a free function invoked by the controller),
/// ReAct Controller (C8), and Context Builder (C9).
///
/// The LLM client, vector-store client, embedder, and DB pool are
/// process-level singletons constructed once here and held for the
/// runtime's lifetime (spec.md §9 — "Global state").
#[derive(Clone)]
pub struct AgentRuntime {
    pub registry: Arc<Registry>,
    pub rag_engine: Arc<RagEngine>,
    pub selector: Arc<HybridSelector>,
    pub executor: Arc<RetryExecutor>,
    pub context_builder: Arc<ContextBuilder>,
    pub controller: Arc<ReactController>,
    pub sync_worker: Arc<SyncWorker>,
    llm: Arc<dyn InferenceProvider>,
}

impl AgentRuntime {
    /// Construct every subsystem from one immutable [`Config`] (spec.md §6
    /// "External configuration").
    pub fn new(config: &Config) -> Result<Self, AgentError> {
        let llm: Arc<dyn InferenceProvider> = match config.llm.provider {
            LlmProvider::Anthropic => {
                let api_key = config.llm.api_key.clone().ok_or_else(|| {
                    AgentError::Configuration("AGENTFLOW_LLM_API_KEY is required for the anthropic provider".to_string())
                })?;
                Arc::new(CloudInferenceProvider::anthropic(api_key, config.llm.model.clone()))
            }
            LlmProvider::OpenAi => {
                let api_key = config.llm.api_key.clone().ok_or_else(|| {
                    AgentError::Configuration("AGENTFLOW_LLM_API_KEY is required for the openai provider".to_string())
                })?;
                Arc::new(CloudInferenceProvider::openai(api_key, config.llm.model.clone()))
            }
            LlmProvider::Mock => Arc::new(MockInferenceProvider::new(vec![
                "I need to call the most relevant function for this.".to_string(),
            ])),
        };
        Self::with_llm(config, llm)
    }

    /// As [`Self::new`], but with the inference collaborator supplied
    /// directly rather than built from `config.llm.provider` — for a
    /// self-hosted model behind a custom [`InferenceProvider`], or for
    /// tests that need scripted responses an opaque `Mock` variant can't
    /// express.
    pub fn with_llm(config: &Config, llm: Arc<dyn InferenceProvider>) -> Result<Self, AgentError> {
        let store: Arc<dyn Store> = if config.storage.database_dsn == ":memory:" {
            Arc::new(crate::registry::store::InMemoryStore::new())
        } else {
            Arc::new(
                SqliteStore::open(&config.storage.database_dsn)
                    .map_err(|e| AgentError::Configuration(e.to_string()))?,
            )
        };
        let registry = Arc::new(Registry::new(store));

        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let rag_engine = Arc::new(RagEngine::new(embedder, vector_index));

        let selector = Arc::new(HybridSelector::new(
            rag_engine.clone(),
            llm.clone(),
            config.agent.rule_threshold,
            config.rag.k1,
            config.rag.k2,
        ));

        let executor = Arc::new(RetryExecutor::new(
            registry.clone(),
            config.llm.app_name.clone(),
            config.llm.app_version.clone(),
            config.storage.function_api_token.clone(),
        ));

        let context_builder = Arc::new(ContextBuilder::new(Arc::new(InMemoryContextStore::new())));

        let controller = Arc::new(ReactController::new(
            context_builder.clone(),
            selector.clone(),
            registry.clone(),
            executor.clone(),
            llm.clone(),
            config.agent,
            config.streaming,
        ));

        let sync_worker = Arc::new(SyncWorker::new(registry.store(), rag_engine.clone()));

        Ok(Self {
            registry,
            rag_engine,
            selector,
            executor,
            context_builder,
            controller,
            sync_worker,
            llm,
        })
    }

    /// Run one query end to end: the controller's single entry point
    /// (spec.md §6 "Request-side API"). Streaming delivers typed step
    /// events to `stream_tx` when supplied.
    pub async fn run(
        &self,
        user_id: types::UserId,
        query: String,
        conversation_id: Option<types::ConversationId>,
        stream_tx: Option<StepSender>,
    ) -> agent::AgentRunState {
        self.controller.run(user_id, query, conversation_id, stream_tx).await
    }

    /// Spawn the CDC worker (C2) as a background task that drains the
    /// SyncEvent queue on a fixed interval until the runtime is dropped
    /// (spec.md §5 — "The sync worker runs as a background task independent
    /// of request handling").
    pub fn spawn_sync_worker(&self) -> tokio::task::JoinHandle<()> {
        let worker = self.sync_worker.clone();
        info!(
            interval_secs = DEFAULT_SYNC_INTERVAL.as_secs(),
            batch_size = DEFAULT_SYNC_BATCH_SIZE,
            "spawning CDC sync worker"
        );
        tokio::spawn(worker.run_forever(DEFAULT_SYNC_BATCH_SIZE, DEFAULT_SYNC_INTERVAL))
    }

    /// The inference provider backing the controller/selector/synthesizer,
    /// exposed for callers that want to issue an out-of-band completion
    /// (e.g. a direct-answer fallback at a higher layer).
    pub fn llm(&self) -> Arc<dyn InferenceProvider> {
        self.llm.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> Config {
        let mut config = Config::from_env();
        config.llm.provider = LlmProvider::Mock;
        config.storage.database_dsn = ":memory:".to_string();
        config
    }

    #[tokio::test]
    async fn runtime_wires_every_subsystem_and_answers_a_query() {
        let runtime = AgentRuntime::new(&mock_config()).unwrap();
        let state = runtime
            .run(types::UserId::new(), "hello there".to_string(), None, None)
            .await;
        assert!(state.final_answer.is_some());
    }

    #[tokio::test]
    async fn sync_worker_drains_a_registry_mutation_into_the_vector_index() {
        let runtime = AgentRuntime::new(&mock_config()).unwrap();
        let schema = crate::registry::types::FunctionSchema {
            function_id: "get_weather".to_string(),
            name: "get_weather".to_string(),
            description: "Get current weather for a location".to_string(),
            category: "weather".to_string(),
            endpoint: "https://api.example.com/weather".to_string(),
            http_method: types::HttpMethod::Get,
            auth_required: false,
            parameters: registry::types::ParameterSchema::default(),
            response_schema: None,
            cache_ttl_seconds: 60,
            timeout_seconds: 10,
            tags: vec![],
            deprecated: false,
            version: 1,
            usage: registry::types::UsageStats::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        runtime.registry.create(schema).await.unwrap();
        assert_eq!(runtime.rag_engine.vector_count().await, 0);
        let report = runtime.sync_worker.process_batch(10).await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(runtime.rag_engine.vector_count().await, 1);
    }
}
