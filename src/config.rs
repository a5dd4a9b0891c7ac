//! Environment-driven configuration. Every knob carries the `MYGPT_` prefix
//! and falls back to a default suitable for a local single-user setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// List separator for `MYGPT_TOOL_ROOTS` and `MYGPT_TOOL_COMMAND_ALLOWLIST`,
/// matching the platform PATH separator.
pub const LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the workstation checkout the agent tools operate in.
    pub repo_root: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    /// When true, every LLM round-trip is mirrored to disk and the event log.
    pub log_llm: bool,
    pub llm_log_dir: PathBuf,
    /// Initial inference-server base URL; mutable at runtime via POST /model.
    pub model_url: String,
    pub n_predict: u32,
    pub reasoning_format: String,
    pub reasoning_in_content: bool,
    pub stop_sequences: Vec<String>,
    pub fallback_stream_delay: Duration,
    pub cors_origins: Vec<String>,
    pub bind_addr: SocketAddr,
    pub base_prompt_path: PathBuf,
    pub base_prompt_sha256_path: PathBuf,
    pub tool_roots: Vec<PathBuf>,
    pub allow_network_tools: bool,
    pub tool_command_allowlist: Vec<String>,
    pub tool_max_output_bytes: usize,
    pub tool_command_timeout_sec: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let repo_root = env_path("MYGPT_REPO_ROOT")
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let data_dir = env_path("MYGPT_DATA_DIR").unwrap_or_else(|| repo_root.join("data"));
        let db_path = env_path("MYGPT_DB_PATH").unwrap_or_else(|| data_dir.join("chat.db"));
        let log_dir = env_path("MYGPT_LOG_DIR").unwrap_or_else(|| data_dir.join("logs"));
        let llm_log_dir =
            env_path("MYGPT_LLM_LOG_DIR").unwrap_or_else(|| data_dir.join("llm_logs"));
        let system_dir = repo_root.join("system");

        let tool_roots: Vec<PathBuf> = env_string("MYGPT_TOOL_ROOTS", "")
            .split(LIST_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        let tool_roots = if tool_roots.is_empty() {
            vec![repo_root.clone()]
        } else {
            tool_roots
        };

        let stop_sequences = match std::env::var("MYGPT_STOP_SEQS") {
            Ok(raw) if !raw.trim().is_empty() => parse_stop_sequences(&raw),
            _ => default_stop_sequences(),
        };

        let reasoning_format = {
            let raw = env_string("MYGPT_REASONING_FORMAT", "none");
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                "none".to_string()
            } else {
                trimmed.to_string()
            }
        };

        Self {
            repo_root,
            db_path,
            log_dir,
            log_level: env_string("MYGPT_LOG_LEVEL", "info"),
            log_llm: env_flag("MYGPT_LOG_LLM"),
            llm_log_dir,
            model_url: env_string("MYGPT_MODEL_URL", "http://127.0.0.1:8080"),
            n_predict: env_parse("MYGPT_N_PREDICT").unwrap_or(256),
            reasoning_format,
            reasoning_in_content: std::env::var("MYGPT_REASONING_IN_CONTENT")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stop_sequences,
            fallback_stream_delay: Duration::from_secs_f64(
                env_parse("MYGPT_FALLBACK_STREAM_DELAY_S").unwrap_or(0.05),
            ),
            cors_origins: env_string("MYGPT_CORS_ORIGINS", "http://localhost:1420")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            bind_addr: env_parse("MYGPT_BIND").unwrap_or_else(|| ([127, 0, 0, 1], 8000).into()),
            base_prompt_path: system_dir.join("base_assistant_prompt.md"),
            base_prompt_sha256_path: system_dir.join("base_assistant_prompt.sha256"),
            tool_roots,
            allow_network_tools: env_flag("MYGPT_ALLOW_NETWORK_TOOLS"),
            tool_command_allowlist: env_string("MYGPT_TOOL_COMMAND_ALLOWLIST", "")
                .split(LIST_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            tool_max_output_bytes: env_parse("MYGPT_TOOL_MAX_OUTPUT_BYTES").unwrap_or(200_000),
            tool_command_timeout_sec: env_parse("MYGPT_TOOL_COMMAND_TIMEOUT").unwrap_or(10),
            data_dir,
        }
    }
}

/// Default stop sequences for a llama.cpp-style completion endpoint: cut the
/// model off as soon as it starts simulating the next transcript turn.
pub fn default_stop_sequences() -> Vec<String> {
    ["\nUser:", "\r\nUser:", "\nSystem:", "\r\nSystem:"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Parse `MYGPT_STOP_SEQS`: either a JSON list or a newline-separated list.
pub fn parse_stop_sequences(raw: &str) -> Vec<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Vec::new();
    }
    if value.starts_with('[') {
        return match serde_json::from_str::<Vec<serde_json::Value>>(value) {
            Ok(items) => items
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => Vec::new(),
        };
    }
    value
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v.trim() == "1").unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
