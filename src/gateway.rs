//! Model gateway: streams tokens from a llama.cpp-style `/completion`
//! endpoint over SSE, degrading to a deterministic local echo when the
//! inference server is unreachable. The gateway never surfaces errors to
//! its caller; a broken server must not break the chat.

use crate::config::AppConfig;
use crate::store::{Message, Role};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub n_predict: u32,
    pub reasoning_format: String,
    pub reasoning_in_content: bool,
    pub stop_sequences: Vec<String>,
    pub fallback_delay: Duration,
}

impl GenerateOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            n_predict: config.n_predict,
            reasoning_format: config.reasoning_format.clone(),
            reasoning_in_content: config.reasoning_in_content,
            stop_sequences: config.stop_sequences.clone(),
            fallback_delay: config.fallback_stream_delay,
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    stream: bool,
    n_predict: u32,
    reasoning_format: &'a str,
    reasoning_in_content: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Deserialize)]
struct CompletionChunk {
    content: Option<String>,
    #[serde(default)]
    stop: bool,
}

/// Stream completion tokens for `prompt`. `messages` is only consulted by
/// the fallback generator, which echoes the last user turn.
pub fn generate(
    messages: Vec<Message>,
    prompt: String,
    model_url: String,
    options: GenerateOptions,
) -> TokenStream {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        if let Err(err) = stream_completion(&prompt, &model_url, &options, &tx).await {
            tracing::debug!(%err, %model_url, "completion stream failed, using fallback");
            fallback_stream(&messages, options.fallback_delay, &tx).await;
        }
    });
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|token| (token, rx))
    }))
}

async fn stream_completion(
    prompt: &str,
    model_url: &str,
    options: &GenerateOptions,
    tx: &mpsc::UnboundedSender<String>,
) -> anyhow::Result<()> {
    let url = format!("{}/completion", model_url.trim_end_matches('/'));
    let body = CompletionRequest {
        prompt,
        stream: true,
        n_predict: options.n_predict,
        reasoning_format: &options.reasoning_format,
        reasoning_in_content: options.reasoning_in_content,
        stop: &options.stop_sequences,
    };

    let response = reqwest::Client::new()
        .post(&url)
        .header("Accept", "text/event-stream")
        .json(&body)
        .send()
        .await?
        .error_for_status()?;

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        let event = event?;
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }
        let chunk: CompletionChunk = serde_json::from_str(data)?;
        if let Some(token) = chunk.content {
            if !token.is_empty() && tx.send(token).is_err() {
                // Receiver is gone; the client disconnected.
                return Ok(());
            }
        }
        if chunk.stop {
            break;
        }
    }
    Ok(())
}

/// Deterministic local fallback: word-split echo of the last user message,
/// one token per word with a small delay so it is still stream-shaped.
async fn fallback_stream(messages: &[Message], delay: Duration, tx: &mpsc::UnboundedSender<String>) {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let text = format!("(no model server) Echo: {last_user}");
    for word in text.trim().split_whitespace() {
        if tx.send(format!("{word} ")).is_err() {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> GenerateOptions {
        GenerateOptions {
            n_predict: 32,
            reasoning_format: "none".to_string(),
            reasoning_in_content: false,
            stop_sequences: crate::config::default_stop_sequences(),
            fallback_delay: Duration::ZERO,
        }
    }

    fn user_message(content: &str) -> Message {
        Message {
            id: 1,
            role: Role::User,
            content: content.to_string(),
            timestamp: String::new(),
            corrects_message_id: None,
        }
    }

    async fn collect(stream: TokenStream) -> Vec<String> {
        stream.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn streams_tokens_until_done_marker() {
        let server = MockServer::start().await;
        let body = "data: {\"content\":\"Hel\"}\n\n\
                    data: {\"content\":\"lo\"}\n\n\
                    data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let tokens = collect(generate(
            vec![user_message("hi")],
            "PROMPT".to_string(),
            server.uri(),
            options(),
        ))
        .await;
        assert_eq!(tokens, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn stop_frame_terminates_the_stream() {
        let server = MockServer::start().await;
        let body = "data: {\"content\":\"first\"}\n\n\
                    data: {\"content\":\"last\",\"stop\":true}\n\n\
                    data: {\"content\":\"never\"}\n\n";
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let tokens = collect(generate(
            vec![user_message("hi")],
            "PROMPT".to_string(),
            server.uri(),
            options(),
        ))
        .await;
        assert_eq!(tokens, vec!["first".to_string(), "last".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_to_echo() {
        // Port 9 is the discard service; nothing is listening there.
        let tokens = collect(generate(
            vec![user_message("Hello")],
            "PROMPT".to_string(),
            "http://127.0.0.1:9".to_string(),
            options(),
        ))
        .await;
        let joined: String = tokens.concat();
        assert!(joined.contains("Echo: Hello"), "{joined}");
        assert!(joined.starts_with("(no model server)"), "{joined}");
    }

    #[tokio::test]
    async fn http_error_status_falls_back_to_echo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tokens = collect(generate(
            vec![user_message("ping")],
            "PROMPT".to_string(),
            server.uri(),
            options(),
        ))
        .await;
        assert!(tokens.concat().contains("Echo: ping"));
    }

    #[tokio::test]
    async fn request_body_carries_stop_sequences() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({
                "stream": true,
                "n_predict": 32,
                "reasoning_format": "none",
                "stop": ["\nUser:", "\r\nUser:", "\nSystem:", "\r\nSystem:"],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: [DONE]\n\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = collect(generate(
            Vec::new(),
            "PROMPT".to_string(),
            server.uri(),
            options(),
        ))
        .await;
        // [DONE] right away: no tokens, and no fallback because the request
        // itself succeeded.
        assert!(tokens.is_empty());
    }
}
