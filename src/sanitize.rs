//! Text scrubbing shared by the prompt assembler and the chat finalizer.
//!
//! Local models leak transcript artifacts into their output: ANSI escape
//! codes, reasoning wrappers, and fake `User:`/`Assistant:` turns. The
//! helpers here remove them. Two different think-block strategies exist on
//! purpose: history sanitization removes the blocks wholesale (including
//! unterminated ones), while response cleanup keeps whatever follows the
//! last close tag so a truncated reasoning block cannot swallow the answer.

use regex::Regex;
use std::sync::LazyLock;

/// Reasoning wrapper variants seen in the wild, including two full-width
/// CJK-bracket spellings some models emit.
const THINK_WRAPPERS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("〈thinking〉", "〈/thinking〉"),
    ("＜thinking＞", "＜/thinking＞"),
];

static ANSI_CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

/// One regex per wrapper: the block body, terminated by the close tag or by
/// end of input when the model was cut off mid-thought.
static THINK_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    THINK_WRAPPERS
        .iter()
        .map(|(open, close)| {
            Regex::new(&format!(
                "(?s){}.*?({}|$)",
                regex::escape(open),
                regex::escape(close)
            ))
            .unwrap()
        })
        .collect()
});

static LEADING_ASSISTANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Assistant:\s*").unwrap());

static ROLE_MARKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(User:|System:|Assistant:)\s*").unwrap());

/// Remove ANSI CSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_CSI.replace_all(text, "").into_owned()
}

/// Remove reasoning blocks of all wrapper variants, unterminated included.
pub fn scrub_reasoning_blocks(text: &str) -> String {
    let mut cleaned = text.to_string();
    for re in THINK_BLOCKS.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned
}

/// Response-side think stripping: if any close tag is present, keep only the
/// text after the last one; otherwise just drop the open tags so an
/// unterminated block does not erase the whole response.
pub fn strip_think_blocks(text: &str) -> String {
    for (_, close) in THINK_WRAPPERS {
        if let Some(idx) = text.rfind(close) {
            return text[idx + close.len()..].to_string();
        }
    }
    let mut cleaned = text.to_string();
    for (open, _) in THINK_WRAPPERS {
        cleaned = cleaned.replace(open, "");
    }
    cleaned
}

/// Strip a leading `Assistant:` label and cut the text at the first later
/// line that begins a new role turn. The model sometimes keeps "continuing
/// the transcript" past its own answer; everything after the first fake
/// turn is noise.
pub fn truncate_at_role_markers(text: &str) -> String {
    let cleaned = text.trim();
    let cleaned = LEADING_ASSISTANT.replace(cleaned, "").into_owned();
    if let Some(m) = ROLE_MARKER_LINE.find(&cleaned) {
        if m.start() > 0 {
            return cleaned[..m.start()].trim_end().to_string();
        }
    }
    cleaned
}

/// History-side sanitization for assistant turns fed back into the prompt:
/// ANSI codes out, reasoning blocks out, and any line that opens a role
/// turn dropped entirely so the model cannot learn to simulate the log.
pub fn sanitize_assistant_history(text: &str) -> String {
    let cleaned = scrub_reasoning_blocks(&strip_ansi(text));
    cleaned
        .lines()
        .filter(|line| {
            !(line.starts_with("User:")
                || line.starts_with("Assistant:")
                || line.starts_with("System:"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
