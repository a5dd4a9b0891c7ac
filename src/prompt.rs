//! Base system prompt loading (hash-pinned) and deterministic prompt
//! assembly for the completion endpoint.

use crate::sanitize::sanitize_assistant_history;
use crate::store::{Message, Role};
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// The base system prompt is process-scoped immutable state. Its file is
/// pinned by a sibling SHA-256 digest; a mismatch means the operator's
/// prompt was tampered with or drifted, and the server refuses to start.
#[derive(Debug, Clone)]
pub struct BaseSystemPrompt {
    pub text: String,
    pub sha256: String,
}

impl BaseSystemPrompt {
    pub fn load(prompt_path: &Path, digest_path: &Path) -> Result<Self> {
        let bytes = std::fs::read(prompt_path)
            .with_context(|| format!("reading base prompt {}", prompt_path.display()))?;
        let actual = sha256_hex(&bytes);
        let expected = std::fs::read_to_string(digest_path)
            .with_context(|| format!("reading prompt digest {}", digest_path.display()))?
            .trim()
            .to_lowercase();
        if actual != expected {
            bail!(
                "base system prompt hash mismatch: expected={expected} actual={actual} path={}",
                prompt_path.display()
            );
        }
        Ok(Self {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            sha256: actual,
        })
    }
}

pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Build the single prompt string sent to the completion endpoint. Pure and
/// deterministic: base prompt lines, two fixed guard lines, an optional
/// sorted defaults line, then the conversation transcript, ending with an
/// open assistant turn.
pub fn assemble_prompt(
    base_prompt: &str,
    messages: &[Message],
    preferences: &BTreeMap<String, String>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    for line in base_prompt.trim_end().lines() {
        if !line.trim().is_empty() {
            parts.push(format!("System: {line}"));
        }
    }
    parts.push(
        "System: Reply as the assistant only. Do not write any 'User:' lines or simulate \
         additional turns."
            .to_string(),
    );
    parts.push(
        "System: Do not output internal reasoning or thinking (e.g., <think>, 〈thinking〉). \
         Provide only the final answer."
            .to_string(),
    );

    if !preferences.is_empty() {
        let defaults = preferences
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!(
            "System: Defaults (apply only when user did not specify otherwise): {defaults}"
        ));
    }

    for message in messages {
        match message.role {
            Role::User => {
                parts.push("User:".to_string());
                parts.push(indent_block(&message.content));
            }
            Role::Assistant => {
                let cleaned = sanitize_assistant_history(&message.content);
                if cleaned.is_empty() {
                    continue;
                }
                parts.push("Assistant:".to_string());
                parts.push(indent_block(&cleaned));
            }
        }
    }

    parts.push("Assistant:".to_string());
    format!("{} ", parts.join("\n"))
}

fn indent_block(text: &str) -> String {
    let prefix = "  ";
    if text.is_empty() {
        return prefix.to_string();
    }
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
