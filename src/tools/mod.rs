//! Tool runtime: a small registry of sandboxed workstation tools.
//!
//! Every tool carries JSON schemas and two gates: `requires_confirmation`
//! (the user must explicitly confirm side-effecting tools) and
//! `requires_network` (off unless the context allows it). Path-taking tools
//! resolve their argument into the allowed roots or fail; subprocess tools
//! run without a shell, under a wall-clock timeout and an output cap.

mod fsops;
mod git;
mod shell;
mod sql;


use crate::config::AppConfig;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use shell::run_subprocess;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        ToolError(message.into())
    }
}

/// Static metadata describing a tool, as listed by `GET /tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub tool_id: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
    pub requires_confirmation: bool,
    pub requires_network: bool,
}

/// Execution context shared by all tools, derived from configuration once
/// at startup.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub repo_root: PathBuf,
    pub db_path: PathBuf,
    pub allowed_roots: Vec<PathBuf>,
    pub allow_network: bool,
    pub command_allowlist: HashSet<String>,
    pub max_output_bytes: usize,
    pub command_timeout_sec: u64,
}

impl ToolContext {
    pub fn from_config(config: &AppConfig) -> Self {
        let allowed_roots: Vec<PathBuf> = config
            .tool_roots
            .iter()
            .map(|root| canonicalize_lenient(root))
            .collect();
        Self {
            repo_root: canonicalize_lenient(&config.repo_root),
            db_path: config.db_path.clone(),
            allowed_roots,
            allow_network: config.allow_network_tools,
            command_allowlist: normalize_allowlist(&config.tool_command_allowlist),
            max_output_bytes: config.tool_max_output_bytes,
            command_timeout_sec: config.tool_command_timeout_sec,
        }
    }
}

/// Lowercase every allowlist entry and also admit its basename, so both
/// "/usr/bin/git" and "git" match either spelling.
fn normalize_allowlist(entries: &[String]) -> HashSet<String> {
    let mut allowlist = HashSet::new();
    for raw in entries {
        let item = raw.trim();
        if item.is_empty() {
            continue;
        }
        allowlist.insert(item.to_lowercase());
        if let Some(name) = Path::new(item).file_name().and_then(|n| n.to_str()) {
            allowlist.insert(name.to_lowercase());
        }
    }
    allowlist
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Registry of the built-in tools, in listing order.
pub struct ToolRegistry {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
        };
        registry.register(Arc::new(fsops::ListDirTool));
        registry.register(Arc::new(fsops::ReadFileTool));
        registry.register(Arc::new(fsops::SearchTextTool));
        registry.register(Arc::new(fsops::StatPathTool));
        registry.register(Arc::new(fsops::WriteFileTool));
        registry.register(Arc::new(git::GitStatusTool));
        registry.register(Arc::new(git::GitDiffTool));
        registry.register(Arc::new(git::GitShowTool));
        registry.register(Arc::new(git::ApplyPatchTool));
        registry.register(Arc::new(sql::SqlQueryTool));
        registry.register(Arc::new(shell::OpenUrlTool));
        registry.register(Arc::new(shell::RunCommandTool));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.push(handler);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.iter().map(|h| h.definition()).collect()
    }

    /// Gate order: unknown tool, network gate, confirmation gate, handler.
    pub async fn run_tool(
        &self,
        tool_id: &str,
        input: &Value,
        ctx: &ToolContext,
        confirmed: bool,
    ) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.definition().tool_id == tool_id)
            .ok_or_else(|| ToolError::new("Unknown tool."))?;
        let definition = handler.definition();
        if definition.requires_network && !ctx.allow_network {
            return Err(ToolError::new("Network tools are disabled."));
        }
        if definition.requires_confirmation && !confirmed {
            return Err(ToolError::new("Tool requires explicit confirmation."));
        }
        handler.run(input, ctx).await
    }
}

// ── Path resolution ────────────────────────────────────

/// Resolve a tool path argument: relative paths are joined to the first
/// allowed root, the result is canonicalized (lexically when it does not
/// exist yet), and it must land inside at least one allowed root.
pub fn resolve_path(value: &str, roots: &[PathBuf]) -> Result<PathBuf, ToolError> {
    let raw = Path::new(value);
    let absolute = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        let first = roots
            .first()
            .ok_or_else(|| ToolError::new("Path is outside allowed roots."))?;
        first.join(raw)
    };
    let resolved = canonicalize_lenient(&absolute);
    for root in roots {
        if resolved.starts_with(root) {
            return Ok(resolved);
        }
    }
    Err(ToolError::new("Path is outside allowed roots."))
}

/// `fs::canonicalize` when the path exists; otherwise a lexical
/// normalization that still collapses `.` and `..` components so traversal
/// cannot sneak past the root check.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ── Input helpers ──────────────────────────────────────

pub(crate) fn require_str(input: &Value, key: &str, missing: &str) -> Result<String, ToolError> {
    match input.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ToolError::new(missing)),
    }
}

pub(crate) fn opt_str(input: &Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub(crate) fn opt_usize(input: &Value, key: &str, default: usize) -> usize {
    input
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub(crate) fn opt_bool(input: &Value, key: &str, default: bool) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(default)
}
