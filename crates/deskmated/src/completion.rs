//! Completion provider client.
//!
//! Speaks the OpenAI-compatible chat completions API, either as a single
//! request/response or as an incremental stream forwarded over a channel.
//! `FakeCompletion` stands in for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::CompletionConfig;

/// Chunks buffered between the stream reader and the consumer
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider response not understood: {0}")]
    InvalidResponse(String),

    #[error("provider returned an empty completion")]
    EmptyResponse,
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Timeout(_) | CompletionError::Transport(_) => true,
            CompletionError::Status { status, .. } => *status == 429 || *status >= 500,
            CompletionError::InvalidResponse(_) | CompletionError::EmptyResponse => false,
        }
    }
}

pub type CompletionStream = mpsc::Receiver<Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// One full completion for the message list
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    /// Incremental completion; the channel closes when the reply is done
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError>;
}

// ============================================================================
// OpenAI-compatible provider
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

pub struct OpenAiCompatible {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                CompletionError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(self.config.timeout())
            } else {
                CompletionError::Transport(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(CompletionError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

/// Pull `choices[0].message.content` out of a full response
fn message_content(body: &serde_json::Value) -> Option<&str> {
    body.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
}

/// Pop one complete line off the front of `buffer`. Bytes are only decoded
/// once the newline has arrived, so a character split across network
/// chunks stays intact.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

/// Parse one server-sent-events line. `Some(None)` marks the end of stream.
fn parse_stream_line(line: &str) -> Option<Option<String>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(None);
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let delta = value
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())?;
    Some(Some(delta.to_string()))
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let response = self.send(messages, false).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        let text = message_content(&body)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(CompletionError::EmptyResponse)?;
        Ok(text.to_string())
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError> {
        let response = self.send(messages, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            use futures_util::StreamExt;

            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Completion stream broke: {}", e);
                        let _ = tx.send(Err(CompletionError::Transport(e.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(line) = take_line(&mut buffer) {
                    match parse_stream_line(&line) {
                        Some(Some(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                debug!("Completion stream receiver dropped");
                                return;
                            }
                        }
                        Some(None) => return,
                        None => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ============================================================================
// Fake provider (tests)
// ============================================================================

/// Provider with a canned reply that records what it was asked
pub struct FakeCompletion {
    reply: Result<String, CompletionError>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: CompletionError) -> Self {
        Self {
            reply: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Messages of the most recent call
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    fn record(&self, messages: &[ChatMessage]) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.record(messages);
        self.reply.clone()
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError> {
        self.record(messages);
        let reply = self.reply.clone()?;
        let words: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let (tx, rx) = mpsc::channel(words.len().max(1));
        for word in words {
            // Capacity covers every word, so this never waits
            let _ = tx.try_send(Ok(word));
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("rules")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "system", "content": "rules" }));
    }

    #[test]
    fn test_message_content_extraction() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Reboot the router." } }]
        });
        assert_eq!(message_content(&body), Some("Reboot the router."));
        assert_eq!(message_content(&serde_json::json!({ "choices": [] })), None);
    }

    #[test]
    fn test_stream_line_parsing() {
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(Some("Hel".to_string()))
        );
        assert_eq!(parse_stream_line("data: [DONE]"), Some(None));
        assert_eq!(parse_stream_line(": keep-alive"), None);
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[test]
    fn test_line_split_inside_character() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = line[..cut].to_vec();
        assert_eq!(take_line(&mut buffer), None);
        buffer.extend_from_slice(&line[cut..]);
        let decoded = take_line(&mut buffer).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(parse_stream_line(&decoded), Some(Some("café".to_string())));
    }

    /// Serve one canned HTTP response, writing `parts` as separate writes
    async fn serve_parts(parts: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            for part in parts {
                socket.write_all(&part).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_stream_keeps_split_characters() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\" crème\"}}]}\n\n\
                    data: [DONE]\n\n"
            .as_bytes()
            .to_vec();
        let first_cut = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let second_cut = body.iter().rposition(|b| *b == 0xC3).unwrap() + 1;
        let parts = vec![
            body[..first_cut].to_vec(),
            body[first_cut..second_cut].to_vec(),
            body[second_cut..].to_vec(),
        ];

        let provider = OpenAiCompatible::new(CompletionConfig {
            endpoint: serve_parts(parts).await,
            timeout_secs: 5,
            ..CompletionConfig::default()
        })
        .unwrap();
        let mut rx = provider
            .complete_stream(&[ChatMessage::user("coffee?")])
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "café crème");
    }

    #[tokio::test]
    async fn test_fake_stream_reassembles_reply() {
        let provider = FakeCompletion::replying("Replace the toner cartridge");
        let mut rx = provider
            .complete_stream(&[ChatMessage::user("what fixed it?")])
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "Replace the toner cartridge");
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CompletionError::Timeout(Duration::from_secs(60)).is_retryable());
        assert!(CompletionError::Status { status: 429, message: String::new() }.is_retryable());
        assert!(!CompletionError::Status { status: 400, message: String::new() }.is_retryable());
        assert!(!CompletionError::EmptyResponse.is_retryable());
    }
}
