//! Preference engine: the reset-aware effective view, proposal inference
//! from recent user turns, and the approve/reject/reset lifecycle.

use crate::error::ApiError;
use crate::store::{ProposalStatus, Role, Store};
use serde_json::json;
use std::collections::BTreeMap;

/// How many of the newest user turns are scanned for repeated phrasing.
const INFERENCE_WINDOW: usize = 6;

/// A preference qualifies for proposal only when it shows up in at least
/// this many distinct recent user messages.
const MIN_MENTIONS: usize = 2;

struct Candidate {
    key: &'static str,
    value: &'static str,
    terms: &'static [&'static str],
}

/// Checked in order; ties on mention count go to the earlier entry.
const CANDIDATES: &[Candidate] = &[
    Candidate {
        key: "verbosity",
        value: "concise",
        terms: &["concise", "brief", "short", "terse"],
    },
    Candidate {
        key: "verbosity",
        value: "detailed",
        terms: &["detailed", "detail", "thorough", "full"],
    },
    Candidate {
        key: "format",
        value: "bullets",
        terms: &["bullet", "bullets", "bullet points"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredProposal {
    pub key: &'static str,
    pub value: &'static str,
    pub proposal_text: String,
    pub rationale: String,
}

/// Reset-aware effective view: the latest reset for the scope defines a
/// cutoff, preferences strictly newer than it are merged in id order with
/// later entries winning. Returns an empty map when nothing survives.
pub async fn effective_preferences(
    store: &Store,
    scope: &str,
) -> anyhow::Result<BTreeMap<String, String>> {
    let reset = store.latest_preference_reset(scope).await?;
    let cutoff = reset.as_ref().map(|r| r.created_at.as_str());
    let rows = store.preferences_since(scope, cutoff).await?;
    let mut merged = BTreeMap::new();
    for (key, value) in rows {
        merged.insert(key, value);
    }
    Ok(merged)
}

/// Score the candidate defaults against the newest user turns. Emits a
/// proposal only when a candidate clears the mention floor and does not
/// already match the effective value for its key.
pub fn infer_proposal(
    history: &[crate::store::Message],
    approved: &BTreeMap<String, String>,
) -> Option<InferredProposal> {
    let window: Vec<String> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.to_lowercase())
        .collect();
    let window: Vec<&str> = window
        .iter()
        .rev()
        .take(INFERENCE_WINDOW)
        .rev()
        .map(String::as_str)
        .collect();
    if window.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &Candidate)> = None;
    for candidate in CANDIDATES {
        let count = window
            .iter()
            .filter(|text| candidate.terms.iter().any(|term| text.contains(term)))
            .count();
        if count < MIN_MENTIONS {
            continue;
        }
        match best {
            Some((best_count, _)) if count <= best_count => {}
            _ => best = Some((count, candidate)),
        }
    }

    let (_, winner) = best?;
    if approved.get(winner.key).map(String::as_str) == Some(winner.value) {
        return None;
    }

    let proposal_text = match (winner.key, winner.value) {
        ("verbosity", "concise") => "Prefer concise answers by default.".to_string(),
        ("verbosity", "detailed") => "Prefer detailed answers by default.".to_string(),
        ("format", "bullets") => "Prefer bullet lists when possible.".to_string(),
        (key, value) => format!("Set {key}={value} as a default."),
    };

    Some(InferredProposal {
        key: winner.key,
        value: winner.value,
        proposal_text,
        rationale: "This shows up repeatedly in recent messages; store it as a default?"
            .to_string(),
    })
}

pub struct ApprovalOutcome {
    pub preference_id: i64,
    pub event_id: i64,
}

/// Approve a pending proposal: event first, then the preference that
/// references it, then the status flip.
pub async fn approve_proposal(store: &Store, proposal_id: i64) -> Result<ApprovalOutcome, ApiError> {
    let proposal = store
        .get_proposal(proposal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Proposal not found"))?;
    if proposal.status != ProposalStatus::Pending {
        return Err(ApiError::conflict("Proposal is not pending"));
    }

    let payload = json!({
        "actor": "user",
        "proposal_id": proposal.id,
        "key": proposal.key,
        "value": proposal.value,
    });
    let event_id = store
        .insert_event(
            "preference_approved",
            &payload,
            Some(proposal.conversation_id),
            proposal.causality_message_id,
        )
        .await?;
    let preference_id = store
        .insert_preference(
            &proposal.key,
            &proposal.value,
            "global",
            Some(event_id),
            Some(proposal.id),
        )
        .await?;
    store
        .update_proposal_status(proposal.id, ProposalStatus::Approved)
        .await?;
    Ok(ApprovalOutcome {
        preference_id,
        event_id,
    })
}

/// Reject a pending proposal. Symmetric with approval, minus the
/// preference insert.
pub async fn reject_proposal(store: &Store, proposal_id: i64) -> Result<i64, ApiError> {
    let proposal = store
        .get_proposal(proposal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Proposal not found"))?;
    if proposal.status != ProposalStatus::Pending {
        return Err(ApiError::conflict("Proposal is not pending"));
    }

    let payload = json!({
        "actor": "user",
        "proposal_id": proposal.id,
        "key": proposal.key,
        "value": proposal.value,
    });
    let event_id = store
        .insert_event(
            "preference_rejected",
            &payload,
            Some(proposal.conversation_id),
            proposal.causality_message_id,
        )
        .await?;
    store
        .update_proposal_status(proposal.id, ProposalStatus::Rejected)
        .await?;
    Ok(event_id)
}

pub struct ResetOutcome {
    pub reset_id: i64,
    pub event_id: i64,
}

/// Record a reset: event first, then the reset row whose timestamp becomes
/// the new cutoff for the scope.
pub async fn reset_preferences(
    store: &Store,
    scope: &str,
    conversation_id: Option<i64>,
    causality_message_id: Option<i64>,
) -> anyhow::Result<ResetOutcome> {
    let event_id = store
        .insert_event(
            "preferences_reset",
            &json!({"actor": "user", "scope": scope}),
            conversation_id,
            causality_message_id,
        )
        .await?;
    let reset_id = store.insert_preference_reset(scope, Some(event_id)).await?;
    Ok(ResetOutcome { reset_id, event_id })
}
