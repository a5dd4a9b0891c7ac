//! Shared fixtures: a backend on a temp directory with a pinned prompt, a
//! dead inference-server URL (so the gateway echoes deterministically), and
//! SSE body parsing.

use crate::config::AppConfig;
use crate::prompt::{sha256_hex, BaseSystemPrompt};
use crate::server::{routes, AppState};
use crate::store::Store;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use warp::filters::BoxedFilter;
use warp::Reply;

pub const BASE_PROMPT: &str = "You are a local assistant.\nAnswer plainly.\n";

pub struct TestBackend {
    pub state: AppState,
    // Keeps the temp tree (db, prompt, llm logs) alive for the test body.
    pub tmp: TempDir,
}

pub fn test_config(root: &Path, log_llm: bool) -> AppConfig {
    AppConfig {
        repo_root: root.to_path_buf(),
        data_dir: root.join("data"),
        db_path: root.join("data").join("chat.db"),
        log_dir: root.join("data").join("logs"),
        log_level: "info".to_string(),
        log_llm,
        llm_log_dir: root.join("data").join("llm_logs"),
        // Port 9 (discard): connection refused, so every chat takes the
        // deterministic fallback path.
        model_url: "http://127.0.0.1:9".to_string(),
        n_predict: 64,
        reasoning_format: "none".to_string(),
        reasoning_in_content: false,
        stop_sequences: crate::config::default_stop_sequences(),
        fallback_stream_delay: Duration::ZERO,
        cors_origins: vec!["http://localhost:1420".to_string()],
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        base_prompt_path: root.join("system").join("base_assistant_prompt.md"),
        base_prompt_sha256_path: root.join("system").join("base_assistant_prompt.sha256"),
        tool_roots: vec![root.to_path_buf()],
        allow_network_tools: false,
        tool_command_allowlist: Vec::new(),
        tool_max_output_bytes: 200_000,
        tool_command_timeout_sec: 5,
    }
}

pub async fn test_backend() -> TestBackend {
    test_backend_with(false).await
}

pub async fn test_backend_with(log_llm: bool) -> TestBackend {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let root = tmp.path();
    std::fs::create_dir_all(root.join("system")).unwrap();
    std::fs::write(root.join("system").join("base_assistant_prompt.md"), BASE_PROMPT).unwrap();
    std::fs::write(
        root.join("system").join("base_assistant_prompt.sha256"),
        sha256_hex(BASE_PROMPT),
    )
    .unwrap();

    let config = test_config(root, log_llm);
    let store = Store::open(&config.db_path).await.unwrap();
    let base_prompt =
        BaseSystemPrompt::load(&config.base_prompt_path, &config.base_prompt_sha256_path).unwrap();
    TestBackend {
        state: AppState::new(store, config, base_prompt),
        tmp,
    }
}

pub fn api(state: &AppState) -> BoxedFilter<(impl Reply,)> {
    routes(state.clone())
}

/// Parse an SSE body into its JSON frame payloads.
pub fn parse_sse(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

/// Frame kinds in emission order, for ordering assertions.
pub fn frame_kinds(frames: &[Value]) -> Vec<&'static str> {
    frames
        .iter()
        .filter_map(|frame| {
            if frame.get("token").is_some() {
                Some("token")
            } else if frame.get("proposal").is_some() {
                Some("proposal")
            } else if frame.get("done").is_some() {
                Some("done")
            } else {
                None
            }
        })
        .collect()
}

pub fn token_text(frames: &[Value]) -> String {
    frames
        .iter()
        .filter_map(|frame| frame.get("token").and_then(Value::as_str))
        .collect()
}

/// POST /chat and return the parsed SSE frames.
pub async fn chat_frames(state: &AppState, content: &str, conversation_id: Option<i64>) -> Vec<Value> {
    let mut body = serde_json::json!({ "content": content });
    if let Some(id) = conversation_id {
        body["conversation_id"] = serde_json::json!(id);
    }
    let response = warp::test::request()
        .method("POST")
        .path("/chat")
        .json(&body)
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200, "{:?}", response.body());
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream",
        "chat must stream"
    );
    parse_sse(response.body())
}
