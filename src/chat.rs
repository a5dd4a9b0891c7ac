//! Chat orchestrator: drives a chat or regenerate turn from policy gate to
//! prompt assembly, token relay, and post-stream persistence.
//!
//! The streaming half runs in a spawned task that writes frames into a
//! channel; the HTTP layer turns frames into SSE events. When the client
//! goes away the channel send fails, which is the cancellation signal: the
//! turn is marked stopped, whatever text arrived is persisted with a
//! `[stopped]` suffix, proposal inference is skipped, and no terminal frame
//! is emitted. The finalizer lives in the task, so it runs on the success
//! and the cancel path alike.

use crate::error::ApiError;
use crate::gateway::{self, GenerateOptions};
use crate::policy::{self, PolicyAction, PolicyDecision};
use crate::prefs;
use crate::prompt::{assemble_prompt, sha256_hex};
use crate::server::AppState;
use crate::store::{Message, NewProposal, ProposalRow, Role};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One SSE frame payload. Order within a completed stream is fixed:
/// tokens, then at most one proposal, then done.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Token(String),
    Proposal(ProposalRow),
    Done,
}

impl StreamFrame {
    pub fn to_json(&self) -> Value {
        match self {
            StreamFrame::Token(token) => json!({ "token": token }),
            StreamFrame::Proposal(row) => json!({ "proposal": row }),
            StreamFrame::Done => json!({ "done": true }),
        }
    }
}

/// What kind of turn is streaming; carries the causality id used for
/// events, and decides the quirks (proposals and the `user_prompt` /
/// `assistant_response` events belong to chat turns only).
#[derive(Debug, Clone, Copy)]
enum TurnKind {
    Chat { user_message_id: i64 },
    Regenerate { target_message_id: i64 },
}

impl TurnKind {
    fn causality_message_id(&self) -> i64 {
        match self {
            TurnKind::Chat { user_message_id } => *user_message_id,
            TurnKind::Regenerate { target_message_id } => *target_message_id,
        }
    }

    fn request_event_type(&self) -> &'static str {
        match self {
            TurnKind::Chat { .. } => "llm_request",
            TurnKind::Regenerate { .. } => "llm_regenerate_request",
        }
    }
}

pub struct PreparedTurn {
    pub conversation_id: i64,
    pub decision: Option<PolicyDecision>,
    pub history: Vec<Message>,
    pub preferences: BTreeMap<String, String>,
    pub prompt: String,
    kind: TurnKind,
}

async fn resolve_conversation_id(
    state: &AppState,
    conversation_id: Option<i64>,
) -> Result<i64, ApiError> {
    match conversation_id {
        Some(id) => {
            if !state.store.conversation_exists(id).await? {
                return Err(ApiError::not_found("Conversation not found"));
            }
            Ok(id)
        }
        None => Ok(state.store.latest_conversation_id().await?),
    }
}

/// Pre-stream phase of a chat turn: validation, the policy gate, the user
/// message insert plus its `user_prompt` event, history load and prompt
/// assembly. Everything here happens before the first SSE byte.
pub async fn prepare_chat(
    state: &AppState,
    content: &str,
    conversation_id: Option<i64>,
) -> Result<PreparedTurn, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message content is required"));
    }
    let conversation_id = resolve_conversation_id(state, conversation_id).await?;
    let preferences = prefs::effective_preferences(&state.store, "global").await?;

    let last_role = state.store.last_message_role(conversation_id).await?;
    let decision = policy::evaluate(content, last_role);

    let user_message_id = state
        .store
        .insert_message(conversation_id, Role::User, content, None)
        .await?;
    state
        .store
        .insert_event(
            "user_prompt",
            &json!({ "content": content }),
            Some(conversation_id),
            Some(user_message_id),
        )
        .await?;

    let history = state.store.list_messages(conversation_id).await?;
    let prompt = assemble_prompt(&state.base_prompt.text, &history, &preferences);

    Ok(PreparedTurn {
        conversation_id,
        decision: Some(decision),
        history,
        preferences,
        prompt,
        kind: TurnKind::Chat { user_message_id },
    })
}

/// Pre-stream phase of a regenerate turn. The target must be an existing
/// assistant message; the prompt history excludes it. No `user_prompt`
/// event and no policy gate here.
pub async fn prepare_regenerate(
    state: &AppState,
    target_message_id: i64,
    conversation_id: Option<i64>,
) -> Result<PreparedTurn, ApiError> {
    let conversation_id = resolve_conversation_id(state, conversation_id).await?;

    match state.store.message_role(target_message_id).await? {
        None => return Err(ApiError::not_found("Target message not found")),
        Some(Role::Assistant) => {}
        Some(Role::User) => {
            return Err(ApiError::bad_request(
                "Target message is not an assistant message",
            ))
        }
    }

    let history: Vec<Message> = state
        .store
        .list_messages(conversation_id)
        .await?
        .into_iter()
        .filter(|m| m.id != target_message_id)
        .collect();
    let preferences = prefs::effective_preferences(&state.store, "global").await?;
    let prompt = assemble_prompt(&state.base_prompt.text, &history, &preferences);

    Ok(PreparedTurn {
        conversation_id,
        decision: None,
        history,
        preferences,
        prompt,
        kind: TurnKind::Regenerate { target_message_id },
    })
}

/// Streaming phase, run as a spawned task. Never returns an error to the
/// client; failures are logged and the stream just ends.
pub async fn run_turn(state: AppState, turn: PreparedTurn, tx: mpsc::Sender<StreamFrame>) {
    if let Err(err) = stream_turn(&state, turn, &tx).await {
        tracing::error!(error = %err, "chat turn failed");
    }
}

async fn stream_turn(
    state: &AppState,
    turn: PreparedTurn,
    tx: &mpsc::Sender<StreamFrame>,
) -> anyhow::Result<()> {
    // Policy short-circuit: persist the clarifying question as the
    // assistant turn and skip the model entirely.
    if let Some(decision) = &turn.decision {
        if decision.action == PolicyAction::Clarify {
            let question = decision.question.clone().unwrap_or_default();
            state
                .store
                .insert_message(turn.conversation_id, Role::Assistant, &question, None)
                .await?;
            let _ = tx.send(StreamFrame::Token(question)).await;
            let _ = tx.send(StreamFrame::Done).await;
            return Ok(());
        }
    }

    if let TurnKind::Regenerate { target_message_id } = turn.kind {
        state
            .store
            .insert_event(
                "regenerate_request",
                &json!({ "target_message_id": target_message_id }),
                Some(turn.conversation_id),
                Some(target_message_id),
            )
            .await?;
    }

    let model_url = state.model_url.read().await.clone();
    let trace = LlmTrace::begin(state, &turn, &model_url).await?;

    let mut stream = gateway::generate(
        turn.history.clone(),
        turn.prompt.clone(),
        model_url,
        GenerateOptions::from_config(&state.config),
    );

    let mut chunks: Vec<String> = Vec::new();
    let mut stopped = false;
    while let Some(token) = stream.next().await {
        if tx.send(StreamFrame::Token(token.clone())).await.is_err() {
            stopped = true;
            break;
        }
        chunks.push(token);
    }
    drop(stream);

    // Finalization: always persist what we have, even on the stopped path.
    let mut raw = chunks.concat().trim().to_string();
    if stopped && !raw.is_empty() {
        raw = format!("{raw}\n\n[stopped]");
    }
    let cleaned = clean_assistant_response(&raw);

    let mut proposal_row: Option<ProposalRow> = None;
    if !cleaned.is_empty() {
        let corrects = match turn.kind {
            TurnKind::Chat { .. } => None,
            TurnKind::Regenerate { target_message_id } => Some(target_message_id),
        };
        let assistant_message_id = state
            .store
            .insert_message(turn.conversation_id, Role::Assistant, &cleaned, corrects)
            .await?;

        if let TurnKind::Chat { user_message_id } = turn.kind {
            if !stopped
                && state
                    .store
                    .pending_proposal(turn.conversation_id)
                    .await?
                    .is_none()
            {
                if let Some(inferred) = prefs::infer_proposal(&turn.history, &turn.preferences) {
                    let proposal_id = state
                        .store
                        .insert_proposal(NewProposal {
                            conversation_id: turn.conversation_id,
                            key: inferred.key,
                            value: inferred.value,
                            proposal_text: &inferred.proposal_text,
                            rationale: Some(&inferred.rationale),
                            causality_message_id: Some(user_message_id),
                            assistant_message_id: Some(assistant_message_id),
                        })
                        .await?;
                    proposal_row = state.store.get_proposal(proposal_id).await?;
                }
            }

            state
                .store
                .insert_event(
                    "assistant_response",
                    &json!({ "content": cleaned }),
                    Some(turn.conversation_id),
                    Some(assistant_message_id),
                )
                .await?;
        }
    }

    if let Some(trace) = trace {
        trace.finish(state, &turn, &raw, &cleaned, stopped).await?;
    }

    if !stopped {
        if let Some(row) = proposal_row {
            let _ = tx.send(StreamFrame::Proposal(row)).await;
        }
        let _ = tx.send(StreamFrame::Done).await;
    }
    Ok(())
}

/// Post-stream cleanup: think blocks, ANSI noise, then role-marker
/// truncation. If think-stripping removed everything, retry with the
/// remaining passes only so a fully-wrapped but real answer survives.
pub fn clean_assistant_response(raw: &str) -> String {
    use crate::sanitize::{strip_ansi, strip_think_blocks, truncate_at_role_markers};

    let cleaned =
        truncate_at_role_markers(strip_ansi(&strip_think_blocks(raw)).trim());
    if !cleaned.is_empty() {
        return cleaned;
    }
    truncate_at_role_markers(strip_ansi(raw).trim())
}

// ── LLM log side channel ───────────────────────────────

/// Optional per-request trace (`MYGPT_LOG_LLM=1`): the exact prompt and
/// response bytes on disk, plus hash-carrying events in the store.
struct LlmTrace {
    trace_id: String,
    request_event_id: i64,
    log_dir: PathBuf,
}

impl LlmTrace {
    async fn begin(
        state: &AppState,
        turn: &PreparedTurn,
        model_url: &str,
    ) -> anyhow::Result<Option<LlmTrace>> {
        if !state.config.log_llm {
            return Ok(None);
        }
        let trace_id = uuid::Uuid::new_v4().simple().to_string();
        let log_dir = state.config.llm_log_dir.clone();
        tokio::fs::create_dir_all(&log_dir).await?;

        let prompt_path = log_dir.join(format!("{trace_id}.prompt.txt"));
        tokio::fs::write(&prompt_path, &turn.prompt).await?;

        let payload = json!({
            "trace_id": trace_id,
            "model_url": model_url,
            "prompt_path": prompt_path.display().to_string(),
            "prompt_sha256": sha256_hex(&turn.prompt),
        });
        let request_event_id = state
            .store
            .insert_event(
                turn.kind.request_event_type(),
                &payload,
                Some(turn.conversation_id),
                Some(turn.kind.causality_message_id()),
            )
            .await?;
        tracing::info!(
            trace_id = %trace_id,
            event_id = request_event_id,
            "llm request logged"
        );
        Ok(Some(LlmTrace {
            trace_id,
            request_event_id,
            log_dir,
        }))
    }

    async fn finish(
        self,
        state: &AppState,
        turn: &PreparedTurn,
        raw: &str,
        cleaned: &str,
        stopped: bool,
    ) -> anyhow::Result<()> {
        let response_path = self.log_dir.join(format!("{}.response.txt", self.trace_id));
        let cleaned_path = self
            .log_dir
            .join(format!("{}.response.cleaned.txt", self.trace_id));
        tokio::fs::write(&response_path, raw).await?;
        tokio::fs::write(&cleaned_path, cleaned).await?;

        let payload = json!({
            "trace_id": self.trace_id,
            "request_event_id": self.request_event_id,
            "response_path": response_path.display().to_string(),
            "response_sha256": sha256_hex(raw),
            "response_cleaned_path": cleaned_path.display().to_string(),
            "response_cleaned_sha256": sha256_hex(cleaned),
            "stopped": stopped,
        });
        state
            .store
            .insert_event(
                "llm_response",
                &payload,
                Some(turn.conversation_id),
                Some(turn.kind.causality_message_id()),
            )
            .await?;
        tracing::info!(trace_id = %self.trace_id, stopped, "llm response logged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::helpers::test_backend;

    #[test]
    fn cleanup_strips_think_then_role_markers() {
        let raw = "<think>planning</think>Assistant: the answer\nUser: fake";
        assert_eq!(clean_assistant_response(raw), "the answer");
    }

    #[test]
    fn cleanup_unterminated_think_keeps_the_inner_text() {
        let raw = "<think>the actual answer with no close tag";
        assert_eq!(
            clean_assistant_response(raw),
            "the actual answer with no close tag"
        );
    }

    #[test]
    fn cleanup_falls_back_when_think_strip_empties_the_text() {
        // Nothing follows the close tag, so think-stripping yields an empty
        // string; the retry keeps the raw content instead of losing the turn.
        let raw = "<think>reasoning only</think>";
        assert_eq!(clean_assistant_response(raw), "<think>reasoning only</think>");
    }

    #[tokio::test]
    async fn client_disconnect_persists_partial_text_with_stopped_suffix() {
        let backend = test_backend().await;
        let state = backend.state.clone();
        let turn = prepare_chat(&state, "Hello there", None).await.unwrap();
        let conversation_id = turn.conversation_id;

        let (tx, mut rx) = mpsc::channel::<StreamFrame>(1);
        let worker = tokio::spawn(run_turn(state.clone(), turn, tx));

        // Take one token, then hang up.
        let first = rx.recv().await.expect("expected at least one token");
        assert!(matches!(first, StreamFrame::Token(_)));
        drop(rx);
        worker.await.unwrap();

        let messages = state.store.list_messages(conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        let assistant = &messages[1];
        assert_eq!(assistant.role, Role::Assistant);
        assert!(
            assistant.content.ends_with("[stopped]"),
            "{}",
            assistant.content
        );

        // Stopped turns never run proposal inference.
        assert!(state
            .store
            .pending_proposal(conversation_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn completed_turn_emits_done_after_tokens() {
        let backend = test_backend().await;
        let state = backend.state.clone();
        let turn = prepare_chat(&state, "Hello", None).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<StreamFrame>(64);
        tokio::spawn(run_turn(state.clone(), turn, tx));

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert!(matches!(frames.last(), Some(StreamFrame::Done)));
        let token_text: String = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(token_text.contains("Echo: Hello"), "{token_text}");
    }
}
