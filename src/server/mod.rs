//! HTTP surface: warp route tree, SSE replies, CORS and request logging.
//! Handlers stay thin; the interesting work lives in the store, the chat
//! orchestrator, the preference engine and the tool runtime.

#[cfg(test)]
pub(crate) mod tests;

use crate::chat::{self, StreamFrame};
use crate::config::AppConfig;
use crate::error::{self, handle_rejection, ApiError};
use crate::prefs;
use crate::prompt::BaseSystemPrompt;
use crate::store::{Role, Store};
use crate::tools::{ToolContext, ToolRegistry};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use warp::filters::BoxedFilter;
use warp::{Filter, Rejection, Reply};

/// Process-wide shared state. The model URL is the one mutable cell;
/// last-writer-wins semantics are fine for a single local user.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub base_prompt: Arc<BaseSystemPrompt>,
    pub model_url: Arc<RwLock<String>>,
    pub registry: Arc<ToolRegistry>,
    pub tool_context: Arc<ToolContext>,
}

impl AppState {
    pub fn new(store: Store, config: AppConfig, base_prompt: BaseSystemPrompt) -> Self {
        let tool_context = ToolContext::from_config(&config);
        Self {
            store,
            model_url: Arc::new(RwLock::new(config.model_url.clone())),
            config: Arc::new(config),
            base_prompt: Arc::new(base_prompt),
            registry: Arc::new(ToolRegistry::with_builtin_tools()),
            tool_context: Arc::new(tool_context),
        }
    }
}

// ── Request shapes ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConversationCreate {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    content: String,
    role: Role,
    corrects_message_id: Option<i64>,
    conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    content: String,
    conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RegenerateBody {
    target_message_id: i64,
    conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ToolRunBody {
    tool_id: String,
    #[serde(default)]
    tool_input: Value,
    conversation_id: Option<i64>,
    causality_message_id: Option<i64>,
    #[serde(default)]
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct ModelBody {
    model_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    scope: Option<String>,
    conversation_id: Option<i64>,
    causality_message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProposalsQuery {
    conversation_id: Option<i64>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<i64>,
    event_type: Option<String>,
    conversation_id: Option<i64>,
}

// ── Routes ─────────────────────────────────────────────

pub fn routes(state: AppState) -> BoxedFilter<(impl Reply,)> {
    let with_state = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "ok"})));

    let list_conversations = warp::path!("conversations")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(list_conversations_handler);
    let create_conversation = warp::path!("conversations")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(create_conversation_handler);

    let list_messages = warp::path!("messages")
        .and(warp::get())
        .and(warp::query::<MessagesQuery>())
        .and(with_state.clone())
        .and_then(list_messages_handler);
    let create_message = warp::path!("messages")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(create_message_handler);

    let chat = warp::path!("chat")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(chat_handler);
    let regenerate = warp::path!("regenerate")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(regenerate_handler);

    let list_preferences = warp::path!("preferences")
        .and(warp::get())
        .and(warp::query::<ScopeQuery>())
        .and(with_state.clone())
        .and_then(list_preferences_handler);
    let reset_preferences = warp::path!("preferences" / "reset")
        .and(warp::post())
        .and(warp::query::<ResetQuery>())
        .and(with_state.clone())
        .and_then(reset_preferences_handler);

    let list_proposals = warp::path!("preference-proposals")
        .and(warp::get())
        .and(warp::query::<ProposalsQuery>())
        .and(with_state.clone())
        .and_then(list_proposals_handler);
    let approve_proposal = warp::path!("preference-proposals" / i64 / "approve")
        .and(warp::post())
        .and(with_state.clone())
        .and_then(approve_proposal_handler);
    let reject_proposal = warp::path!("preference-proposals" / i64 / "reject")
        .and(warp::post())
        .and(with_state.clone())
        .and_then(reject_proposal_handler);

    let list_tools = warp::path!("tools")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(list_tools_handler);
    let run_tool = warp::path!("tools" / "run")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(run_tool_handler);

    let get_model = warp::path!("model")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(get_model_handler);
    let set_model = warp::path!("model")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(set_model_handler);

    let list_events = warp::path!("events")
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with_state.clone())
        .and_then(list_events_handler);

    let services_status = warp::path!("services" / "status")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(services_status_handler);

    let cors = {
        let origins = state.config.cors_origins.clone();
        let base = warp::cors()
            .allow_methods(vec!["GET", "POST", "OPTIONS"])
            .allow_headers(vec!["content-type"])
            .allow_credentials(true);
        if origins.iter().any(|o| o == "*") {
            base.allow_any_origin()
        } else {
            base.allow_origins(origins.iter().map(String::as_str))
        }
    };

    let log = warp::log::custom(|info| {
        tracing::info!(
            method = %info.method(),
            path = info.path(),
            status = info.status().as_u16(),
            duration_ms = info.elapsed().as_millis() as u64,
            "request_complete"
        );
    });

    health
        .or(list_conversations)
        .or(create_conversation)
        .or(list_messages)
        .or(create_message)
        .or(chat)
        .or(regenerate)
        .or(list_preferences)
        .or(reset_preferences)
        .or(list_proposals)
        .or(approve_proposal)
        .or(reject_proposal)
        .or(list_tools)
        .or(run_tool)
        .or(get_model)
        .or(set_model)
        .or(list_events)
        .or(services_status)
        .recover(handle_rejection)
        .with(cors)
        .with(log)
        .boxed()
}

fn internal(err: anyhow::Error) -> Rejection {
    error::reject(ApiError::Internal(err))
}

async fn require_conversation(state: &AppState, conversation_id: Option<i64>) -> Result<i64, ApiError> {
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

// ── Handlers ───────────────────────────────────────────

async fn list_conversations_handler(state: AppState) -> Result<impl Reply, Rejection> {
    let conversations = state.store.list_conversations().await.map_err(internal)?;
    Ok(warp::reply::json(&conversations))
}

async fn create_conversation_handler(
    body: ConversationCreate,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let id = state
        .store
        .create_conversation(body.title.as_deref())
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({ "id": id })))
}

async fn list_messages_handler(
    query: MessagesQuery,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let conversation_id = require_conversation(&state, query.conversation_id)
        .await
        .map_err(error::reject)?;
    let messages = state
        .store
        .list_messages(conversation_id)
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&messages))
}

async fn create_message_handler(
    body: MessageCreate,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(error::reject(ApiError::bad_request(
            "Message content is required",
        )));
    }
    let conversation_id = require_conversation(&state, body.conversation_id)
        .await
        .map_err(error::reject)?;
    let id = state
        .store
        .insert_message(conversation_id, body.role, content, body.corrects_message_id)
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({ "id": id })))
}

/// Convert a prepared turn into an SSE response driven by a worker task.
/// Frames are written as `data: <compact JSON>\n\n` exactly; when the
/// client disconnects the body stream is dropped, the channel closes, and
/// the worker's finalizer takes the stopped path.
fn sse_turn_reply(state: AppState, turn: chat::PreparedTurn) -> impl Reply {
    let (tx, rx) = mpsc::channel::<StreamFrame>(16);
    tokio::spawn(chat::run_turn(state, turn, tx));
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    })
    .map(|frame| Ok::<_, Infallible>(format!("data: {}\n\n", frame.to_json())));

    let mut response = warp::http::Response::new(warp::hyper::Body::wrap_stream(stream));
    response.headers_mut().insert(
        warp::http::header::CONTENT_TYPE,
        warp::http::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        warp::http::header::CACHE_CONTROL,
        warp::http::HeaderValue::from_static("no-cache"),
    );
    response
}

async fn chat_handler(body: ChatBody, state: AppState) -> Result<impl Reply, Rejection> {
    let turn = chat::prepare_chat(&state, &body.content, body.conversation_id)
        .await
        .map_err(error::reject)?;
    Ok(sse_turn_reply(state, turn))
}

async fn regenerate_handler(body: RegenerateBody, state: AppState) -> Result<impl Reply, Rejection> {
    let turn = chat::prepare_regenerate(&state, body.target_message_id, body.conversation_id)
        .await
        .map_err(error::reject)?;
    Ok(sse_turn_reply(state, turn))
}

async fn list_preferences_handler(
    query: ScopeQuery,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let scope = query.scope.unwrap_or_else(|| "global".to_string());
    let reset = state
        .store
        .latest_preference_reset(&scope)
        .await
        .map_err(internal)?;
    let preferences = state
        .store
        .list_preferences(&scope)
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({
        "scope": scope,
        "reset": reset,
        "preferences": preferences,
    })))
}

async fn reset_preferences_handler(
    query: ResetQuery,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let scope = query.scope.unwrap_or_else(|| "global".to_string());
    let outcome = prefs::reset_preferences(
        &state.store,
        &scope,
        query.conversation_id,
        query.causality_message_id,
    )
    .await
    .map_err(internal)?;
    Ok(warp::reply::json(&json!({
        "reset_id": outcome.reset_id,
        "event_id": outcome.event_id,
    })))
}

async fn list_proposals_handler(
    query: ProposalsQuery,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let conversation_id = require_conversation(&state, query.conversation_id)
        .await
        .map_err(error::reject)?;
    let status = query.status.unwrap_or_else(|| "pending".to_string());
    let proposals = state
        .store
        .list_proposals(conversation_id, &status)
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({ "proposals": proposals })))
}

async fn approve_proposal_handler(
    proposal_id: i64,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let outcome = prefs::approve_proposal(&state.store, proposal_id)
        .await
        .map_err(error::reject)?;
    Ok(warp::reply::json(&json!({
        "preference_id": outcome.preference_id,
        "event_id": outcome.event_id,
    })))
}

async fn reject_proposal_handler(
    proposal_id: i64,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let event_id = prefs::reject_proposal(&state.store, proposal_id)
        .await
        .map_err(error::reject)?;
    Ok(warp::reply::json(&json!({ "event_id": event_id })))
}

async fn list_tools_handler(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(
        &json!({ "tools": state.registry.definitions() }),
    ))
}

async fn run_tool_handler(body: ToolRunBody, state: AppState) -> Result<impl Reply, Rejection> {
    let Some(causality_message_id) = body.causality_message_id else {
        return Err(error::reject(ApiError::bad_request(
            "causality_message_id is required",
        )));
    };

    let conversation_id = match body.conversation_id {
        Some(id) => Some(id),
        None => state
            .store
            .conversation_id_for_message(causality_message_id)
            .await
            .map_err(internal)?,
    };

    let started_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let start = std::time::Instant::now();
    let result = state
        .registry
        .run_tool(&body.tool_id, &body.tool_input, &state.tool_context, body.confirmed)
        .await;
    let duration = start.elapsed().as_secs_f64();
    let ended_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();

    let (success, output, error_text) = match result {
        Ok(output) => (true, Some(output), None),
        Err(err) => (false, None, Some(err.0)),
    };

    let payload = json!({
        "tool_id": body.tool_id,
        "input": body.tool_input,
        "output": output,
        "error": error_text,
        "confirmed": body.confirmed,
        "started_at": started_at,
        "ended_at": ended_at,
        "duration_sec": (duration * 10_000.0).round() / 10_000.0,
        "success": success,
    });
    state
        .store
        .insert_event("tool_run", &payload, conversation_id, Some(causality_message_id))
        .await
        .map_err(internal)?;

    Ok(warp::reply::json(&json!({
        "success": success,
        "output": output,
        "error": error_text,
    })))
}

async fn get_model_handler(state: AppState) -> Result<impl Reply, Rejection> {
    let model_url = state.model_url.read().await.clone();
    Ok(warp::reply::json(&json!({ "model_url": model_url })))
}

async fn set_model_handler(body: ModelBody, state: AppState) -> Result<impl Reply, Rejection> {
    let model_url = body.model_url.trim().to_string();
    if model_url.is_empty() {
        return Err(error::reject(ApiError::bad_request("model_url is required")));
    }
    *state.model_url.write().await = model_url.clone();
    state
        .store
        .insert_event("model_switch", &json!({ "model_url": model_url }), None, None)
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({ "model_url": model_url })))
}

async fn list_events_handler(query: EventsQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let events = state
        .store
        .list_events(
            query.event_type.as_deref(),
            query.conversation_id,
            query.limit.unwrap_or(200),
        )
        .await
        .map_err(internal)?;
    Ok(warp::reply::json(&json!({ "events": events })))
}

/// Probe the inference server's health endpoint with a short deadline.
async fn services_status_handler(state: AppState) -> Result<impl Reply, Rejection> {
    let model_url = state.model_url.read().await.trim_end_matches('/').to_string();
    let running = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client
            .get(format!("{model_url}/health"))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false),
        Err(_) => false,
    };
    Ok(warp::reply::json(&json!({
        "backend": "ok",
        "llama": { "url": model_url, "running": running },
    })))
}
