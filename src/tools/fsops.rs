//! Filesystem tools: listing, reading, searching, stat and gated writes.
//! Every path argument goes through `resolve_path` before any IO happens.

use super::{
    opt_bool, opt_str, opt_usize, require_str, resolve_path, ToolContext, ToolDefinition,
    ToolError, ToolHandler,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use walkdir::WalkDir;

const DEFAULT_MAX_ENTRIES: usize = 2000;
const DEFAULT_MAX_BYTES: usize = 200_000;
const DEFAULT_MAX_MATCHES: usize = 2000;

pub struct ListDirTool;

#[async_trait]
impl ToolHandler for ListDirTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "list_dir",
            description: "List directory contents within allowed roots.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "recursive": {"type": "boolean"},
                    "max_entries": {"type": "integer"},
                },
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let target =
            opt_str(input, "path").unwrap_or_else(|| ctx.repo_root.display().to_string());
        let recursive = opt_bool(input, "recursive", false);
        let max_entries = opt_usize(input, "max_entries", DEFAULT_MAX_ENTRIES);
        let resolved = resolve_path(&target, &ctx.allowed_roots)?;
        if !resolved.exists() {
            return Err(ToolError::new("Path does not exist."));
        }
        if !resolved.is_dir() {
            return Err(ToolError::new("Path is not a directory."));
        }

        let listing_root = resolved.clone();
        let entries = tokio::task::spawn_blocking(move || {
            let mut entries: Vec<Value> = Vec::new();
            let max_depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(&listing_root)
                .min_depth(1)
                .max_depth(max_depth)
                .into_iter()
                .flatten()
            {
                entries.push(json!({
                    "name": entry.file_name().to_string_lossy(),
                    "path": entry.path().display().to_string(),
                    "type": if entry.file_type().is_dir() { "dir" } else { "file" },
                }));
                if entries.len() >= max_entries {
                    break;
                }
            }
            entries
        })
        .await
        .map_err(|e| ToolError::new(format!("Listing failed: {e}")))?;

        Ok(json!({
            "path": resolved.display().to_string(),
            "truncated": entries.len() >= max_entries,
            "entries": entries,
        }))
    }
}

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "read_file",
            description: "Read a text file within allowed roots.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "max_bytes": {"type": "integer"},
                },
                "required": ["path"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path_value = require_str(input, "path", "Missing path.")?;
        let max_bytes = opt_usize(input, "max_bytes", DEFAULT_MAX_BYTES);
        let resolved = resolve_path(&path_value, &ctx.allowed_roots)?;
        if !resolved.is_file() {
            return Err(ToolError::new("Path does not exist or is not a file."));
        }

        let mut data = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::new(format!("Read failed: {e}")))?;
        let truncated = data.len() > max_bytes;
        if truncated {
            data.truncate(max_bytes);
        }
        Ok(json!({
            "path": resolved.display().to_string(),
            "content": String::from_utf8_lossy(&data),
            "bytes": data.len(),
            "truncated": truncated,
        }))
    }
}

pub struct SearchTextTool;

#[async_trait]
impl ToolHandler for SearchTextTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "search_text",
            description: "Search text within allowed roots.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string"},
                    "max_matches": {"type": "integer"},
                },
                "required": ["pattern"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let pattern = require_str(input, "pattern", "Missing pattern.")?;
        let target =
            opt_str(input, "path").unwrap_or_else(|| ctx.repo_root.display().to_string());
        let max_matches = opt_usize(input, "max_matches", DEFAULT_MAX_MATCHES);
        let resolved = resolve_path(&target, &ctx.allowed_roots)?;
        if !resolved.exists() {
            return Err(ToolError::new("Path does not exist."));
        }

        let (matches, truncated) = match super::shell::which("rg") {
            Some(rg) => ripgrep_search(&rg, &pattern, &resolved, max_matches, ctx).await?,
            None => {
                let pattern = pattern.clone();
                let root = resolved.clone();
                tokio::task::spawn_blocking(move || substring_search(&pattern, &root, max_matches))
                    .await
                    .map_err(|e| ToolError::new(format!("Search failed: {e}")))?
            }
        };

        Ok(json!({
            "pattern": pattern,
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

async fn ripgrep_search(
    rg: &PathBuf,
    pattern: &str,
    path: &PathBuf,
    max_matches: usize,
    ctx: &ToolContext,
) -> Result<(Vec<Value>, bool), ToolError> {
    let cmd = vec![
        rg.display().to_string(),
        "--column".to_string(),
        "--line-number".to_string(),
        "--no-heading".to_string(),
        "--max-count".to_string(),
        max_matches.to_string(),
        pattern.to_string(),
        path.display().to_string(),
    ];
    let result = super::shell::run_subprocess(
        &cmd,
        None,
        ctx.command_timeout_sec,
        ctx.max_output_bytes,
        &ctx.repo_root,
    )
    .await?;

    let exit_code = result["exit_code"].as_i64().unwrap_or(-1);
    // ripgrep exits 1 for "no matches"; both 0 and 1 are success.
    if exit_code != 0 && exit_code != 1 {
        let stderr = result["stderr"].as_str().unwrap_or("").trim();
        return Err(ToolError::new(if stderr.is_empty() {
            "Search failed.".to_string()
        } else {
            stderr.to_string()
        }));
    }

    let mut matches = Vec::new();
    let mut truncated = false;
    for line in result["stdout"].as_str().unwrap_or("").lines() {
        let parts: Vec<&str> = line.splitn(4, ':').collect();
        if parts.len() < 4 {
            continue;
        }
        let (Ok(line_no), Ok(column)) = (parts[1].parse::<u64>(), parts[2].parse::<u64>()) else {
            continue;
        };
        matches.push(json!({
            "path": parts[0],
            "line": line_no,
            "column": column,
            "match": parts[3],
        }));
        if matches.len() >= max_matches {
            truncated = true;
            break;
        }
    }
    Ok((matches, truncated))
}

/// In-process substring fallback when ripgrep is not installed.
fn substring_search(pattern: &str, root: &PathBuf, max_matches: usize) -> (Vec<Value>, bool) {
    let mut matches = Vec::new();
    for entry in WalkDir::new(root).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        for (idx, line) in text.lines().enumerate() {
            if let Some(pos) = line.find(pattern) {
                matches.push(json!({
                    "path": entry.path().display().to_string(),
                    "line": idx + 1,
                    "column": pos + 1,
                    "match": line,
                }));
                if matches.len() >= max_matches {
                    return (matches, true);
                }
            }
        }
    }
    (matches, false)
}

pub struct StatPathTool;

#[async_trait]
impl ToolHandler for StatPathTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "stat_path",
            description: "Return metadata for a path within allowed roots.",
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path_value = require_str(input, "path", "Missing path.")?;
        let resolved = resolve_path(&path_value, &ctx.allowed_roots)?;
        let Ok(metadata) = tokio::fs::metadata(&resolved).await else {
            return Ok(json!({
                "path": resolved.display().to_string(),
                "exists": false,
            }));
        };

        let modified_at = metadata
            .modified()
            .ok()
            .map(|mtime| {
                chrono::DateTime::<chrono::Local>::from(mtime)
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();

        Ok(json!({
            "path": resolved.display().to_string(),
            "exists": true,
            "type": if metadata.is_dir() { "dir" } else { "file" },
            "size": metadata.len(),
            "modified_at": modified_at,
        }))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "write_file",
            description: "Write text content to a file within allowed roots.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "mode": {"type": "string", "enum": ["overwrite", "append"]},
                },
                "required": ["path", "content"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: true,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path_value = require_str(input, "path", "Missing path.")?;
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing content."))?
            .to_string();
        let mode = opt_str(input, "mode").unwrap_or_else(|| "overwrite".to_string());
        if mode != "overwrite" && mode != "append" {
            return Err(ToolError::new("Invalid mode."));
        }
        let resolved = resolve_path(&path_value, &ctx.allowed_roots)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::new(format!("Write failed: {e}")))?;
        }
        let write_result = if mode == "append" {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
            {
                Ok(mut file) => file.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&resolved, content.as_bytes()).await
        };
        write_result.map_err(|e| ToolError::new(format!("Write failed: {e}")))?;

        Ok(json!({
            "path": resolved.display().to_string(),
            "bytes_written": content.len(),
        }))
    }
}
