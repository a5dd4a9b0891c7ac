//! Git tools, all thin wrappers over the git binary run in the repo root.

use super::shell::{run_subprocess, which};
use super::{opt_bool, opt_str, require_str, resolve_path, ToolContext, ToolDefinition, ToolError,
            ToolHandler};
use async_trait::async_trait;
use serde_json::{json, Value};

fn git_binary() -> Result<String, ToolError> {
    which("git")
        .map(|p| p.display().to_string())
        .ok_or_else(|| ToolError::new("git not found."))
}

async fn run_git(cmd: Vec<String>, input: Option<&str>, ctx: &ToolContext) -> Result<Value, ToolError> {
    run_subprocess(
        &cmd,
        input,
        ctx.command_timeout_sec,
        ctx.max_output_bytes,
        &ctx.repo_root,
    )
    .await
}

pub struct GitStatusTool;

#[async_trait]
impl ToolHandler for GitStatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "git_status",
            description: "Run git status -sb for the repository.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, _input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let git = git_binary()?;
        run_git(vec![git, "status".into(), "-sb".into()], None, ctx).await
    }
}

pub struct GitDiffTool;

#[async_trait]
impl ToolHandler for GitDiffTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "git_diff",
            description: "Run git diff for the repository.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "staged": {"type": "boolean"},
                    "path": {"type": "string"},
                },
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let git = git_binary()?;
        let mut cmd = vec![git, "diff".to_string()];
        if opt_bool(input, "staged", false) {
            cmd.push("--staged".to_string());
        }
        if let Some(path_value) = opt_str(input, "path") {
            let resolved = resolve_path(&path_value, &ctx.allowed_roots)?;
            cmd.push("--".to_string());
            cmd.push(resolved.display().to_string());
        }
        run_git(cmd, None, ctx).await
    }
}

pub struct GitShowTool;

#[async_trait]
impl ToolHandler for GitShowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "git_show",
            description: "Run git show for a ref.",
            input_schema: json!({
                "type": "object",
                "properties": {"ref": {"type": "string"}},
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let git = git_binary()?;
        let git_ref = opt_str(input, "ref").unwrap_or_else(|| "HEAD".to_string());
        run_git(vec![git, "show".to_string(), git_ref], None, ctx).await
    }
}

pub struct ApplyPatchTool;

#[async_trait]
impl ToolHandler for ApplyPatchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "apply_patch",
            description: "Apply a unified diff patch in the repository.",
            input_schema: json!({
                "type": "object",
                "properties": {"patch": {"type": "string"}},
                "required": ["patch"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: true,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let patch = require_str(input, "patch", "Missing patch.")?;
        let git = git_binary()?;
        run_git(
            vec![
                git,
                "apply".to_string(),
                "--whitespace=nowarn".to_string(),
                "-".to_string(),
            ],
            Some(&patch),
            ctx,
        )
        .await
    }
}
