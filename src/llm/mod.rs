//! Inference provider capability — abstracts over cloud LLM APIs so the
//! Hybrid Selector (C4), Parameter Synthesizer (C5), and ReAct Controller
//! (C8) can share one trait and swap in a deterministic mock for tests.
//!
//! Free-text completion only, no native tool-calling or structured-output
//! negotiation — C4/C5/C8 all parse the model's text response themselves
//! (spec.md §4.4/§4.5/§4.8).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Role;

/// One turn in a prompt sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOptions {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            model: None,
            extra: HashMap::new(),
        }
    }
}

/// Token usage reported back by the provider, when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of one inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum InferenceError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request timed out")]
    Timeout,

    #[error("response parse error: {0}")]
    ParseError(String),
}

/// Unified trait over cloud LLM backends.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError>;

    fn provider_name(&self) -> &str;

    fn default_model(&self) -> &str;
}

/// reqwest-based provider shaped for Anthropic's and OpenAI's chat-completion
/// APIs — selected at construction time since both are simple
/// messages-in/text-out JSON endpoints once unwrapped.
pub struct CloudInferenceProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    anthropic_shaped: bool,
}

impl CloudInferenceProvider {
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: model.into(),
            anthropic_shaped: true,
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: model.into(),
            anthropic_shaped: false,
        }
    }

    fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system = None;
        let mut rest = Vec::with_capacity(messages.len());
        for m in messages {
            if matches!(m.role, Role::System) && system.is_none() {
                system = Some(m.content.clone());
            } else {
                rest.push(m);
            }
        }
        (system, rest)
    }
}

#[async_trait]
impl InferenceProvider for CloudInferenceProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let model = options.model.clone().unwrap_or_else(|| self.model.clone());

        let response = if self.anthropic_shaped {
            let (system, rest) = Self::split_system(messages);
            let body = serde_json::json!({
                "model": model,
                "max_tokens": options.max_tokens,
                "temperature": options.temperature,
                "system": system,
                "messages": rest.iter().map(|m| serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })).collect::<Vec<_>>(),
            });
            self.client
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await
                .map_err(|e| InferenceError::Provider(e.to_string()))?
        } else {
            let body = serde_json::json!({
                "model": model,
                "max_tokens": options.max_tokens,
                "temperature": options.temperature,
                "messages": messages.iter().map(|m| serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })).collect::<Vec<_>>(),
            });
            self.client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| InferenceError::Provider(e.to_string()))?
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InferenceError::RateLimited { retry_after_ms: 1000 });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Provider(format!("http {status}: {body}")));
        }

        let value: serde_json::Value =
            response.json().await.map_err(|e| InferenceError::ParseError(e.to_string()))?;

        let content = if self.anthropic_shaped {
            value["content"][0]["text"].as_str().unwrap_or_default().to_string()
        } else {
            value["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string()
        };
        if content.is_empty() {
            return Err(InferenceError::ParseError("empty completion content".to_string()));
        }

        Ok(InferenceResponse {
            content,
            model,
            usage: Usage::default(),
        })
    }

    fn provider_name(&self) -> &str {
        if self.anthropic_shaped {
            "anthropic"
        } else {
            "openai"
        }
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Deterministic provider for tests and offline development: returns a
/// scripted sequence of responses, cycling if exhausted.
pub struct MockInferenceProvider {
    scripted: parking_lot::Mutex<Vec<String>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockInferenceProvider {
    pub fn new(scripted: Vec<String>) -> Self {
        Self { scripted: parking_lot::Mutex::new(scripted), calls: std::sync::atomic::AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for MockInferenceProvider {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let scripted = self.scripted.lock();
        if scripted.is_empty() {
            return Err(InferenceError::Provider("mock has no scripted responses".to_string()));
        }
        let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % scripted.len();
        Ok(InferenceResponse {
            content: scripted[idx].clone(),
            model: "mock".to_string(),
            usage: Usage::default(),
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_cycles_through_scripted_responses() {
        let mock = MockInferenceProvider::new(vec!["a".to_string(), "b".to_string()]);
        let r1 = mock.complete(&[Message::user("x")], &InferenceOptions::default()).await.unwrap();
        let r2 = mock.complete(&[Message::user("x")], &InferenceOptions::default()).await.unwrap();
        let r3 = mock.complete(&[Message::user("x")], &InferenceOptions::default()).await.unwrap();
        assert_eq!(r1.content, "a");
        assert_eq!(r2.content, "b");
        assert_eq!(r3.content, "a");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn mock_with_no_script_errors() {
        let mock = MockInferenceProvider::new(vec![]);
        let result = mock.complete(&[Message::user("x")], &InferenceOptions::default()).await;
        assert!(result.is_err());
    }
}
