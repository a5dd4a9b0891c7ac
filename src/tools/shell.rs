//! Subprocess plumbing shared by the git and command tools, plus the
//! `run_command` and `open_url` tools themselves.

use super::{require_str, resolve_path, ToolContext, ToolDefinition, ToolError, ToolHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Locate an executable on PATH.
pub fn which(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{binary}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Run `cmd` (argv form, no shell) with a wall-clock timeout and a joint
/// stdout+stderr cap. On timeout the child is killed and the call fails.
/// The cap keeps the first half of the budget for stdout and hands the
/// remainder to stderr.
pub async fn run_subprocess(
    cmd: &[String],
    input_text: Option<&str>,
    timeout_sec: u64,
    max_output_bytes: usize,
    cwd: &Path,
) -> Result<Value, ToolError> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| ToolError::new("Missing command."))?;
    let start = Instant::now();

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input_text.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ToolError::new(format!("Failed to spawn {program}: {e}")))?;

    if let Some(text) = input_text {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| ToolError::new(format!("Failed to write stdin: {e}")))?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }
    }

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_sec),
        child.wait_with_output(),
    )
    .await
    {
        Ok(result) => result.map_err(|e| ToolError::new(format!("Command failed: {e}")))?,
        // kill_on_drop reaps the child when the timed-out future is dropped.
        Err(_) => return Err(ToolError::new(format!("Command timed out after {timeout_sec}s"))),
    };

    let duration = start.elapsed().as_secs_f64();
    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let mut truncated = false;
    if stdout.chars().count() + stderr.chars().count() > max_output_bytes {
        truncated = true;
        let keep = max_output_bytes / 2;
        stdout = take_chars(&stdout, keep).to_string();
        stderr = take_chars(&stderr, max_output_bytes - keep).to_string();
    }

    Ok(json!({
        "exit_code": output.status.code().unwrap_or(-1),
        "stdout": stdout,
        "stderr": stderr,
        "truncated": truncated,
        "duration_sec": round4(duration),
    }))
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub struct RunCommandTool;

#[async_trait]
impl ToolHandler for RunCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "run_command",
            description: "Run an allowlisted command with args.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["command"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: true,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = require_str(input, "command", "Missing command.")?;
        let args: Vec<String> = match input.get("args") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(_) => return Err(ToolError::new("args must be a list.")),
        };

        let basename = Path::new(&command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&command)
            .to_lowercase();
        if !ctx.command_allowlist.contains(&basename)
            && !ctx.command_allowlist.contains(&command.to_lowercase())
        {
            return Err(ToolError::new("Command is not allowlisted."));
        }

        let mut cmd = vec![command];
        cmd.extend(args);
        run_subprocess(
            &cmd,
            None,
            ctx.command_timeout_sec,
            ctx.max_output_bytes,
            &ctx.repo_root,
        )
        .await
    }
}

pub struct OpenUrlTool;

#[async_trait]
impl ToolHandler for OpenUrlTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "open_url",
            description: "Return a URL that requires explicit user action to open.",
            input_schema: json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: true,
            requires_network: false,
        }
    }

    /// Validates only; the backend never opens anything on the user's
    /// behalf.
    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let url_value = require_str(input, "url", "Missing url.")?;
        let parsed =
            Url::parse(&url_value).map_err(|_| ToolError::new("URL must include a scheme."))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| ToolError::new("Invalid file URL."))?;
            let resolved = resolve_path(&path.display().to_string(), &ctx.allowed_roots)?;
            return Ok(json!({
                "url": format!("file://{}", resolved.display()),
                "requires_user_action": true,
            }));
        }

        Ok(json!({
            "url": url_value,
            "requires_user_action": true,
        }))
    }
}
