//! Response policy: the pre-LLM gate that decides whether to answer or to
//! ask one fixed clarifying question.
//!
//! The heuristics intentionally err on the side of not asking questions;
//! clarification is requested only for extremely ambiguous one-word
//! directives or for acknowledgements with no open assistant question.

use crate::store::Role;
use serde::Serialize;

const AMBIGUOUS_SINGLE_WORDS: &[&str] = &["this", "that", "it", "one", "thing", "stuff"];

const BARE_ACKNOWLEDGEMENTS: &[&str] = &["ok", "okay", "yes", "sure", "maybe"];

const AMBIGUOUS_PHRASES: &[&str] = &[
    "do it",
    "do that",
    "do the thing",
    "help me",
    "help with this",
    "fix it",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Answer,
    Clarify,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub question: Option<String>,
    pub rationale: Option<String>,
}

impl PolicyDecision {
    fn answer() -> Self {
        Self {
            action: PolicyAction::Answer,
            question: None,
            rationale: None,
        }
    }

    fn clarify(question: &str, rationale: &str) -> Self {
        Self {
            action: PolicyAction::Clarify,
            question: Some(question.to_string()),
            rationale: Some(rationale.to_string()),
        }
    }
}

/// Decide whether to answer `user_message` or pause for clarification.
/// `previous_message_role` is the role of the newest message already in the
/// conversation, used to tell "ok" answering an assistant question apart
/// from "ok" out of nowhere.
pub fn evaluate(user_message: &str, previous_message_role: Option<Role>) -> PolicyDecision {
    let normalized = user_message.trim();
    if normalized.is_empty() {
        return PolicyDecision::clarify(
            "I didn't catch what you'd like me to do. Could you restate your intent?",
            "blank_message",
        );
    }

    let lowered = normalized.to_lowercase();
    if AMBIGUOUS_SINGLE_WORDS.contains(&lowered.as_str()) {
        return PolicyDecision::clarify("What specifically should I work on?", "single_ambiguous_token");
    }

    if BARE_ACKNOWLEDGEMENTS.contains(&lowered.as_str())
        && previous_message_role != Some(Role::Assistant)
    {
        return PolicyDecision::clarify(
            "Could you describe the task or question you want me to handle?",
            "ack_without_context",
        );
    }

    if AMBIGUOUS_PHRASES.iter().any(|p| lowered.starts_with(p)) {
        return PolicyDecision::clarify(
            "You mentioned needing help, but I need the concrete task. What should I produce?",
            "generic_help_request",
        );
    }

    PolicyDecision::answer()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_message_clarifies() {
        let decision = evaluate("   ", None);
        assert_eq!(decision.action, PolicyAction::Clarify);
        assert_eq!(decision.rationale.as_deref(), Some("blank_message"));
    }

    #[test]
    fn single_ambiguous_token_clarifies() {
        for word in ["this", "That", "IT", "stuff"] {
            let decision = evaluate(word, Some(Role::Assistant));
            assert_eq!(decision.action, PolicyAction::Clarify, "word: {word}");
            assert_eq!(decision.rationale.as_deref(), Some("single_ambiguous_token"));
        }
    }

    #[test]
    fn ack_without_open_question_clarifies() {
        let decision = evaluate("ok", Some(Role::User));
        assert_eq!(decision.action, PolicyAction::Clarify);
        assert_eq!(decision.rationale.as_deref(), Some("ack_without_context"));
        assert_eq!(
            decision.question.as_deref(),
            Some("Could you describe the task or question you want me to handle?")
        );
    }

    #[test]
    fn ack_answering_assistant_question_passes() {
        let decision = evaluate("ok", Some(Role::Assistant));
        assert_eq!(decision.action, PolicyAction::Answer);
    }

    #[test]
    fn generic_help_request_clarifies() {
        for phrase in ["do it", "do that now", "help me please", "fix it fast"] {
            let decision = evaluate(phrase, Some(Role::Assistant));
            assert_eq!(decision.action, PolicyAction::Clarify, "phrase: {phrase}");
            assert_eq!(decision.rationale.as_deref(), Some("generic_help_request"));
        }
    }

    #[test]
    fn concrete_request_answers() {
        let decision = evaluate("Summarize the release notes for v2", None);
        assert_eq!(decision.action, PolicyAction::Answer);
        assert!(decision.question.is_none());
    }
}
