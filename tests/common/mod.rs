//! Shared helpers for the cross-module scenario tests (spec.md §8).
//!
//! The mock server is a raw `tokio::net::TcpListener` writing canned
//! HTTP/1.1 responses byte-for-byte, not a `reqwest`/`hyper` fixture —
//! there's no mock-HTTP dev-dependency in this crate, so this mirrors the
//! teacher's own `find_available_port`/`start_test_server` pattern from its
//! `http_input` integration tests, just answering the socket directly
//! instead of spinning up a real axum app.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use agentflow_core::config::{AgentConfig, Config, LlmProvider, RagConfig, StreamingConfig};
use agentflow_core::llm::MockInferenceProvider;
use agentflow_core::registry::types::{FunctionSchema, ParameterSchema, UsageStats};
use agentflow_core::types::HttpMethod;
use agentflow_core::AgentRuntime;

/// One scripted response for a single accepted connection.
pub enum MockResponse {
    Json { status: u16, body: serde_json::Value },
    /// Accept the connection, wait out `.0`, then drop it without writing
    /// anything — simulates a hung/unreachable peer for timeout testing.
    HangUp(Duration),
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        _ => "500 Internal Server Error",
    }
}

/// Bind an ephemeral local port and serve `responses` in order, one per
/// accepted connection. Every response carries `Connection: close` so
/// `reqwest` opens a fresh connection for the next call instead of reusing
/// a keep-alive socket (which would desync the response order).
pub async fn spawn_mock_server(responses: Vec<MockResponse>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
    let addr = listener.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            match response {
                MockResponse::HangUp(delay) => {
                    tokio::time::sleep(delay).await;
                }
                MockResponse::Json { status, body } => {
                    let payload = body.to_string();
                    let http = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line(status),
                        payload.len(),
                        payload
                    );
                    let _ = socket.write_all(http.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            }
        }
    });
    (format!("http://{addr}"), handle)
}

/// A minimal `FunctionSchema` pointed at `endpoint`, in `category`, with a
/// short per-call timeout so hang-up scenarios resolve quickly.
pub fn function_schema(id: &str, category: &str, endpoint: &str, timeout_secs: u64) -> FunctionSchema {
    FunctionSchema {
        function_id: id.to_string(),
        name: id.to_string(),
        description: format!("test function for {category}"),
        category: category.to_string(),
        endpoint: endpoint.to_string(),
        http_method: HttpMethod::Get,
        auth_required: false,
        parameters: ParameterSchema::default(),
        response_schema: None,
        cache_ttl_seconds: 0,
        timeout_seconds: timeout_secs,
        tags: vec![],
        deprecated: false,
        version: 1,
        usage: UsageStats::default(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

/// An in-memory, mock-LLM config suitable for every scenario test —
/// no network calls escape the process except the ones each test points
/// at its own mock server.
pub fn test_config() -> Config {
    agentflow_core::init_tracing();
    let mut config = Config::from_env();
    config.llm.provider = LlmProvider::Mock;
    config.storage.database_dsn = ":memory:".to_string();
    config.rag = RagConfig { k1: 20, k2: 5, rerank: true };
    config.agent = AgentConfig { max_steps: 2, ..AgentConfig::default() };
    config.streaming = StreamingConfig::default();
    config
}

/// An `AgentRuntime` wired with a scripted `MockInferenceProvider` instead
/// of the single fixed phrase `AgentRuntime::new` falls back to for
/// `LlmProvider::Mock` — for scenarios that need THINK/ACT/REFLECT text
/// in the exact shape the controller's prompt contracts expect (spec.md
/// §4.8), the way `ReactController`'s own unit tests script it.
pub fn build_runtime(config: &Config, scripted: Vec<String>) -> AgentRuntime {
    let llm = Arc::new(MockInferenceProvider::new(scripted));
    AgentRuntime::with_llm(config, llm).expect("runtime construction with a scripted mock never fails")
}
