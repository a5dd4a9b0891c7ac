//! The plain JSON endpoints: health, conversations, messages, model and
//! events.

use super::helpers::*;
use serde_json::{json, Value};

#[tokio::test]
async fn health_reports_ok() {
    let backend = test_backend().await;
    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&api(&backend.state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn conversations_list_newest_first_with_counts() {
    let backend = test_backend().await;
    let state = &backend.state;

    let created = warp::test::request()
        .method("POST")
        .path("/conversations")
        .json(&json!({"title": "Second"}))
        .reply(&api(state))
        .await;
    assert_eq!(created.status(), 200);
    let new_id = serde_json::from_slice::<Value>(created.body()).unwrap()["id"]
        .as_i64()
        .unwrap();

    chat_frames(state, "Hello", Some(new_id)).await;

    let response = warp::test::request()
        .method("GET")
        .path("/conversations")
        .reply(&api(state))
        .await;
    let conversations: Vec<Value> = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0]["id"], new_id);
    assert_eq!(conversations[0]["title"], "Second");
    assert_eq!(conversations[0]["message_count"], 2);
    assert_eq!(conversations[1]["title"], "Legacy");
    assert_eq!(conversations[1]["message_count"], 0);
}

#[tokio::test]
async fn untitled_conversation_is_allowed() {
    let backend = test_backend().await;
    let response = warp::test::request()
        .method("POST")
        .path("/conversations")
        .json(&json!({}))
        .reply(&api(&backend.state))
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn message_create_validates_content_and_conversation() {
    let backend = test_backend().await;
    let state = &backend.state;

    let blank = warp::test::request()
        .method("POST")
        .path("/messages")
        .json(&json!({"role": "user", "content": "   "}))
        .reply(&api(state))
        .await;
    assert_eq!(blank.status(), 400);

    let missing_conversation = warp::test::request()
        .method("POST")
        .path("/messages")
        .json(&json!({"role": "user", "content": "hi", "conversation_id": 999}))
        .reply(&api(state))
        .await;
    assert_eq!(missing_conversation.status(), 404);

    let ok = warp::test::request()
        .method("POST")
        .path("/messages")
        .json(&json!({"role": "user", "content": "  padded  "}))
        .reply(&api(state))
        .await;
    assert_eq!(ok.status(), 200);
    let conversation_id = state.store.latest_conversation_id().await.unwrap();
    let messages = state.store.list_messages(conversation_id).await.unwrap();
    // Content is stored stripped.
    assert_eq!(messages[0].content, "padded");
}

#[tokio::test]
async fn messages_listing_for_unknown_conversation_is_404() {
    let backend = test_backend().await;
    let response = warp::test::request()
        .method("GET")
        .path("/messages?conversation_id=31337")
        .reply(&api(&backend.state))
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["detail"], "Conversation not found");
}

#[tokio::test]
async fn model_url_roundtrip_appends_switch_event() {
    let backend = test_backend().await;
    let state = &backend.state;

    let initial = warp::test::request()
        .method("GET")
        .path("/model")
        .reply(&api(state))
        .await;
    let body: Value = serde_json::from_slice(initial.body()).unwrap();
    assert_eq!(body["model_url"], "http://127.0.0.1:9");

    let updated = warp::test::request()
        .method("POST")
        .path("/model")
        .json(&json!({"model_url": "http://127.0.0.1:8081  "}))
        .reply(&api(state))
        .await;
    assert_eq!(updated.status(), 200);
    let body: Value = serde_json::from_slice(updated.body()).unwrap();
    assert_eq!(body["model_url"], "http://127.0.0.1:8081");

    let after = warp::test::request()
        .method("GET")
        .path("/model")
        .reply(&api(state))
        .await;
    let body: Value = serde_json::from_slice(after.body()).unwrap();
    assert_eq!(body["model_url"], "http://127.0.0.1:8081");

    let events = state
        .store
        .list_events(Some("model_switch"), None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["model_url"], "http://127.0.0.1:8081");

    let empty = warp::test::request()
        .method("POST")
        .path("/model")
        .json(&json!({"model_url": "  "}))
        .reply(&api(state))
        .await;
    assert_eq!(empty.status(), 400);
}

#[tokio::test]
async fn events_endpoint_filters_by_type_and_conversation() {
    let backend = test_backend().await;
    let state = &backend.state;
    chat_frames(state, "Hello", None).await;
    let conversation_id = state.store.latest_conversation_id().await.unwrap();

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/events?event_type=user_prompt&conversation_id={conversation_id}&limit=5"
        ))
        .reply(&api(state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "user_prompt");

    let all = warp::test::request()
        .method("GET")
        .path("/events")
        .reply(&api(state))
        .await;
    let all: Value = serde_json::from_slice(all.body()).unwrap();
    assert!(all["events"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn services_status_reports_unreachable_llama() {
    let backend = test_backend().await;
    let response = warp::test::request()
        .method("GET")
        .path("/services/status")
        .reply(&api(&backend.state))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["backend"], "ok");
    assert_eq!(body["llama"]["running"], false);
    assert_eq!(body["llama"]["url"], "http://127.0.0.1:9");
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let backend = test_backend().await;
    let response = warp::test::request()
        .method("GET")
        .path("/definitely-not-here")
        .reply(&api(&backend.state))
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["detail"].is_string());
}
