//! Preference lifecycle over HTTP: approve, reject, conflict handling and
//! reset semantics.

use super::helpers::*;
use serde_json::{json, Value};

/// Drive two concise chats until a proposal frame appears, and return its id.
async fn create_pending_proposal(state: &crate::server::AppState) -> i64 {
    let conversation_id = state.store.latest_conversation_id().await.unwrap();
    chat_frames(state, "Please be concise.", Some(conversation_id)).await;
    let frames = chat_frames(state, "Keep it concise.", Some(conversation_id)).await;
    frames
        .iter()
        .find_map(|f| f.get("proposal"))
        .and_then(|p| p["id"].as_i64())
        .expect("expected a proposal frame")
}

#[tokio::test]
async fn approve_inserts_preference_and_flips_status() {
    let backend = test_backend().await;
    let state = &backend.state;
    let proposal_id = create_pending_proposal(state).await;

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/preference-proposals/{proposal_id}/approve"))
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["preference_id"].is_i64());
    assert!(body["event_id"].is_i64());

    let response = warp::test::request()
        .method("GET")
        .path("/preferences")
        .reply(&api(state))
        .await;
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["scope"], "global");
    let preferences = body["preferences"].as_array().unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(preferences[0]["key"], "verbosity");
    assert_eq!(preferences[0]["value"], "concise");

    let events = state
        .store
        .list_events(Some("preference_approved"), None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["actor"], "user");
    assert_eq!(events[0].payload["proposal_id"], proposal_id);
}

#[tokio::test]
async fn approve_twice_conflicts_and_unknown_is_404() {
    let backend = test_backend().await;
    let state = &backend.state;
    let proposal_id = create_pending_proposal(state).await;

    let first = warp::test::request()
        .method("POST")
        .path(&format!("/preference-proposals/{proposal_id}/approve"))
        .reply(&api(state))
        .await;
    assert_eq!(first.status(), 200);

    let second = warp::test::request()
        .method("POST")
        .path(&format!("/preference-proposals/{proposal_id}/approve"))
        .reply(&api(state))
        .await;
    assert_eq!(second.status(), 409);
    let body: Value = serde_json::from_slice(second.body()).unwrap();
    assert_eq!(body["detail"], "Proposal is not pending");

    let missing = warp::test::request()
        .method("POST")
        .path("/preference-proposals/99999/approve")
        .reply(&api(state))
        .await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn reject_records_decision_without_preference() {
    let backend = test_backend().await;
    let state = &backend.state;
    let proposal_id = create_pending_proposal(state).await;

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/preference-proposals/{proposal_id}/reject"))
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["event_id"].is_i64());

    assert!(state.store.list_preferences("global").await.unwrap().is_empty());
    let proposal = state.store.get_proposal(proposal_id).await.unwrap().unwrap();
    assert_eq!(proposal.status, crate::store::ProposalStatus::Rejected);
}

#[tokio::test]
async fn reset_empties_the_effective_view_but_keeps_history() {
    let backend = test_backend().await;
    let state = &backend.state;
    let proposal_id = create_pending_proposal(state).await;
    warp::test::request()
        .method("POST")
        .path(&format!("/preference-proposals/{proposal_id}/approve"))
        .reply(&api(state))
        .await;

    let effective = crate::prefs::effective_preferences(&state.store, "global")
        .await
        .unwrap();
    assert_eq!(effective.get("verbosity").map(String::as_str), Some("concise"));

    let response = warp::test::request()
        .method("POST")
        .path("/preferences/reset")
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["reset_id"].is_i64());
    assert!(body["event_id"].is_i64());

    // The raw row is still listed, but the effective view is empty.
    let listing = warp::test::request()
        .method("GET")
        .path("/preferences")
        .reply(&api(state))
        .await;
    let listing: Value = serde_json::from_slice(listing.body()).unwrap();
    assert_eq!(listing["preferences"].as_array().unwrap().len(), 1);
    assert!(listing["reset"].is_object());

    let effective = crate::prefs::effective_preferences(&state.store, "global")
        .await
        .unwrap();
    assert!(effective.is_empty());

    let events = state
        .store
        .list_events(Some("preferences_reset"), None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn proposals_listing_defaults_to_pending() {
    let backend = test_backend().await;
    let state = &backend.state;
    let proposal_id = create_pending_proposal(state).await;

    let response = warp::test::request()
        .method("GET")
        .path("/preference-proposals")
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    let proposals = body["proposals"].as_array().unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0]["id"], proposal_id);
    assert_eq!(proposals[0]["proposal_text"], "Prefer concise answers by default.");

    let approved = warp::test::request()
        .method("GET")
        .path("/preference-proposals?status=approved")
        .reply(&api(state))
        .await;
    let approved: Value = serde_json::from_slice(approved.body()).unwrap();
    assert!(approved["proposals"].as_array().unwrap().is_empty());
}
