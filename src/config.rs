//! Process-wide configuration, loaded once at startup and held immutably
//! thereafter (see DESIGN.md — "Global state").

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level configuration bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub rag: RagConfig,
    pub agent: AgentConfig,
    pub streaming: StreamingConfig,
}

/// LLM provider selection and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub app_name: String,
    pub app_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    Mock,
}

/// Relational store / cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sqlite DSN; `:memory:` for an ephemeral in-process store.
    pub database_dsn: String,
    pub cache_dsn: Option<String>,
    pub vector_store_host: Option<String>,
    pub vector_store_port: Option<u16>,
    pub vector_store_collection: String,
    pub embedder_model_id: String,
    /// Bearer credential attached to downstream function calls whose
    /// `FunctionSchema.auth_required` is set (spec.md §4.6) — distinct from
    /// the LLM provider's own API key.
    #[serde(skip_serializing)]
    pub function_api_token: Option<String>,
}

/// RAG retrieval tuning (spec.md §4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RagConfig {
    pub k1: usize,
    pub k2: usize,
    pub rerank: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { k1: 20, k2: 5, rerank: true }
    }
}

/// ReAct loop tuning (spec.md §4.8, §4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub quality_threshold: f64,
    pub rule_threshold: f64,
    pub default_function_timeout: Duration,
    pub think_timeout: Duration,
    pub act_timeout: Duration,
    pub reflect_timeout: Duration,
    pub final_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            quality_threshold: 0.75,
            rule_threshold: 0.85,
            default_function_timeout: Duration::from_secs(30),
            think_timeout: Duration::from_secs(15),
            act_timeout: Duration::from_secs(15),
            reflect_timeout: Duration::from_secs(15),
            final_timeout: Duration::from_secs(20),
        }
    }
}

/// User-facing streaming pacing (spec.md §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub final_answer_chars_per_frame: usize,
    pub final_answer_min_delay_ms: u64,
    pub final_answer_max_delay_ms: u64,
    pub step_channel_capacity: usize,
    pub step_send_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            final_answer_chars_per_frame: 24,
            final_answer_min_delay_ms: 10,
            final_answer_max_delay_ms: 60,
            step_channel_capacity: 64,
            step_send_timeout_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let provider = match env::var("AGENTFLOW_LLM_PROVIDER").as_deref() {
            Ok("openai") => LlmProvider::OpenAi,
            Ok("mock") => LlmProvider::Mock,
            _ => LlmProvider::Anthropic,
        };

        Self {
            llm: LlmConfig {
                provider,
                api_key: env::var("AGENTFLOW_LLM_API_KEY").ok(),
                model: env::var("AGENTFLOW_LLM_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string()),
                app_name: env!("CARGO_PKG_NAME").to_string(),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                database_dsn: env::var("AGENTFLOW_DATABASE_DSN")
                    .unwrap_or_else(|_| ":memory:".to_string()),
                cache_dsn: env::var("AGENTFLOW_CACHE_DSN").ok(),
                vector_store_host: env::var("AGENTFLOW_VECTOR_HOST").ok(),
                vector_store_port: env::var("AGENTFLOW_VECTOR_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                vector_store_collection: env::var("AGENTFLOW_VECTOR_COLLECTION")
                    .unwrap_or_else(|_| "function_embeddings".to_string()),
                embedder_model_id: env::var("AGENTFLOW_EMBEDDER_MODEL")
                    .unwrap_or_else(|_| "hash-embedder-v1".to_string()),
                function_api_token: env::var("AGENTFLOW_FUNCTION_API_TOKEN").ok(),
            },
            rag: RagConfig {
                k1: env::var("AGENTFLOW_RAG_K1").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
                k2: env::var("AGENTFLOW_RAG_K2").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
                rerank: env::var("AGENTFLOW_RAG_RERANK")
                    .ok()
                    .map(|v| v != "0" && v.to_lowercase() != "false")
                    .unwrap_or(true),
            },
            agent: AgentConfig {
                max_steps: env::var("AGENTFLOW_MAX_STEPS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                quality_threshold: env::var("AGENTFLOW_QUALITY_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.75),
                ..AgentConfig::default()
            },
            streaming: StreamingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_spec_compliant() {
        let rag = RagConfig::default();
        assert_eq!(rag.k1, 20);
        assert_eq!(rag.k2, 5);
        let agent = AgentConfig::default();
        assert_eq!(agent.max_steps, 5);
        assert!((agent.quality_threshold - 0.75).abs() < f64::EPSILON);
        assert!((agent.rule_threshold - 0.85).abs() < f64::EPSILON);
    }

    // Mutates process-wide environment variables, so these run serialized
    // against any other test touching the same keys.
    #[test]
    #[serial]
    fn from_env_overrides_llm_and_rag_settings() {
        env::set_var("AGENTFLOW_LLM_PROVIDER", "mock");
        env::set_var("AGENTFLOW_RAG_K1", "40");
        env::set_var("AGENTFLOW_RAG_K2", "8");
        env::set_var("AGENTFLOW_MAX_STEPS", "3");

        let config = Config::from_env();

        assert_eq!(config.llm.provider, LlmProvider::Mock);
        assert_eq!(config.rag.k1, 40);
        assert_eq!(config.rag.k2, 8);
        assert_eq!(config.agent.max_steps, 3);

        env::remove_var("AGENTFLOW_LLM_PROVIDER");
        env::remove_var("AGENTFLOW_RAG_K1");
        env::remove_var("AGENTFLOW_RAG_K2");
        env::remove_var("AGENTFLOW_MAX_STEPS");
    }

    #[test]
    #[serial]
    fn from_env_falls_back_to_documented_defaults_when_unset() {
        env::remove_var("AGENTFLOW_LLM_PROVIDER");
        env::remove_var("AGENTFLOW_RAG_K1");

        let config = Config::from_env();

        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert_eq!(config.rag.k1, 20);
    }
}
