//! Read-only SQL access to the chat database. The connection is opened in
//! read-only mode and the statement is vetted before execution: exactly one
//! statement, and it must start with SELECT or WITH.

use super::{opt_usize, require_str, ToolContext, ToolDefinition, ToolError, ToolHandler};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Row};
use std::sync::LazyLock;

const DEFAULT_MAX_ROWS: usize = 200;

static SELECT_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(select|with)\b").unwrap());

pub struct SqlQueryTool;

#[async_trait]
impl ToolHandler for SqlQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_id: "sql_query",
            description: "Run a read-only SQL query against the local SQLite DB.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "max_rows": {"type": "integer"},
                },
                "required": ["query"],
                "additionalProperties": false,
            }),
            output_schema: json!({"type": "object"}),
            requires_confirmation: false,
            requires_network: false,
        }
    }

    async fn run(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = require_str(input, "query", "Missing query.")?;
        let normalized = query.trim();
        let statement = normalized.trim_end_matches(';').trim_end();
        if statement.contains(';') {
            return Err(ToolError::new("Multiple statements are not allowed."));
        }
        if !SELECT_ONLY.is_match(statement) {
            return Err(ToolError::new("Only SELECT queries are allowed."));
        }
        let max_rows = opt_usize(input, "max_rows", DEFAULT_MAX_ROWS);

        let mut conn = SqliteConnectOptions::new()
            .filename(&ctx.db_path)
            .read_only(true)
            .connect()
            .await
            .map_err(|e| ToolError::new(format!("Failed to open database: {e}")))?;

        // Fetch one row past the cap to detect truncation without pulling
        // the whole result set.
        let mut rows: Vec<Map<String, Value>> = Vec::new();
        let mut truncated = false;
        {
            let mut stream = sqlx::query(statement).fetch(&mut conn);
            while let Some(row) = stream.next().await {
                let row = row.map_err(|e| ToolError::new(format!("Query failed: {e}")))?;
                if rows.len() >= max_rows {
                    truncated = true;
                    break;
                }
                rows.push(row_to_json(&row));
            }
        }

        Ok(json!({
            "rows": rows,
            "truncated": truncated,
            "row_count": rows.len(),
        }))
    }
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(row, idx));
    }
    out
}

/// SQLite cells are dynamically typed; probe the common decodings in order
/// and fall back to NULL for anything exotic.
fn column_value(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return value
            .map(|bytes| Value::String(BASE64.encode(bytes)))
            .unwrap_or(Value::Null);
    }
    Value::Null
}
