//! The LLM log side channel, and the prompt-isolation property it makes
//! observable: a pending proposal must never leak into the prompt.

use super::helpers::*;
use serde_json::Value;

#[tokio::test]
async fn trace_writes_prompt_and_response_files_with_events() {
    let backend = test_backend_with(true).await;
    let state = &backend.state;
    chat_frames(state, "Hello tracing", None).await;

    let requests = state
        .store
        .list_events(Some("llm_request"), None, 10)
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    let payload = &requests[0].payload;
    let trace_id = payload["trace_id"].as_str().unwrap();
    assert_eq!(trace_id.len(), 32, "128-bit hex trace id");

    let prompt_path = payload["prompt_path"].as_str().unwrap();
    let prompt_text = std::fs::read_to_string(prompt_path).unwrap();
    assert!(prompt_text.contains("User:\n  Hello tracing"));
    assert!(prompt_text.ends_with("Assistant: "));
    assert_eq!(
        payload["prompt_sha256"].as_str().unwrap(),
        crate::prompt::sha256_hex(&prompt_text)
    );

    let responses = state
        .store
        .list_events(Some("llm_response"), None, 10)
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);
    let payload = &responses[0].payload;
    assert_eq!(payload["trace_id"], trace_id);
    assert_eq!(payload["request_event_id"], requests[0].id);
    assert_eq!(payload["stopped"], false);

    let raw = std::fs::read_to_string(payload["response_path"].as_str().unwrap()).unwrap();
    let cleaned =
        std::fs::read_to_string(payload["response_cleaned_path"].as_str().unwrap()).unwrap();
    assert!(raw.contains("Echo: Hello tracing"));
    assert!(cleaned.contains("Echo: Hello tracing"));
}

#[tokio::test]
async fn regenerate_trace_uses_the_regenerate_event_type() {
    let backend = test_backend_with(true).await;
    let state = &backend.state;
    let conversation_id = state.store.latest_conversation_id().await.unwrap();
    state
        .store
        .insert_message(conversation_id, crate::store::Role::User, "question", None)
        .await
        .unwrap();
    let target = state
        .store
        .insert_message(conversation_id, crate::store::Role::Assistant, "answer", None)
        .await
        .unwrap();

    let response = warp::test::request()
        .method("POST")
        .path("/regenerate")
        .json(&serde_json::json!({"target_message_id": target}))
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    parse_sse(response.body());

    let requests = state
        .store
        .list_events(Some("llm_regenerate_request"), None, 10)
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].causality_message_id, Some(target));
    assert!(state
        .store
        .list_events(Some("llm_request"), None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn pending_proposal_does_not_leak_into_the_prompt() {
    let backend = test_backend_with(true).await;
    let state = &backend.state;
    let conversation_id = state.store.latest_conversation_id().await.unwrap();
    state
        .store
        .insert_proposal(crate::store::NewProposal {
            conversation_id,
            key: "verbosity",
            value: "concise",
            proposal_text: "Prefer concise answers by default.",
            rationale: Some("test"),
            causality_message_id: None,
            assistant_message_id: None,
        })
        .await
        .unwrap();

    chat_frames(state, "Hello", Some(conversation_id)).await;

    let requests = state
        .store
        .list_events(Some("llm_request"), None, 10)
        .await
        .unwrap();
    let prompt_path = requests[0].payload["prompt_path"].as_str().unwrap();
    let prompt_text = std::fs::read_to_string(prompt_path).unwrap();
    // Pending proposals are not preferences; no Defaults line may appear.
    assert!(!prompt_text.contains("System: Defaults"), "{prompt_text}");
    assert!(state.store.list_preferences("global").await.unwrap().is_empty());
}

#[tokio::test]
async fn approved_preference_shows_in_prompt_until_reset() {
    let backend = test_backend_with(true).await;
    let state = &backend.state;
    let conversation_id = state.store.latest_conversation_id().await.unwrap();
    let proposal_id = state
        .store
        .insert_proposal(crate::store::NewProposal {
            conversation_id,
            key: "verbosity",
            value: "concise",
            proposal_text: "Prefer concise answers by default.",
            rationale: None,
            causality_message_id: None,
            assistant_message_id: None,
        })
        .await
        .unwrap();
    crate::prefs::approve_proposal(&state.store, proposal_id)
        .await
        .unwrap();

    chat_frames(state, "First question", Some(conversation_id)).await;
    let requests = state
        .store
        .list_events(Some("llm_request"), None, 10)
        .await
        .unwrap();
    let prompt_text =
        std::fs::read_to_string(requests[0].payload["prompt_path"].as_str().unwrap()).unwrap();
    assert!(
        prompt_text.contains(
            "System: Defaults (apply only when user did not specify otherwise): verbosity=concise"
        ),
        "{prompt_text}"
    );

    crate::prefs::reset_preferences(&state.store, "global", None, None)
        .await
        .unwrap();
    chat_frames(state, "Second question", Some(conversation_id)).await;

    let requests = state
        .store
        .list_events(Some("llm_request"), None, 10)
        .await
        .unwrap();
    // Newest first: the post-reset request.
    let prompt_text =
        std::fs::read_to_string(requests[0].payload["prompt_path"].as_str().unwrap()).unwrap();
    assert!(!prompt_text.contains("System: Defaults"), "{prompt_text}");
}
