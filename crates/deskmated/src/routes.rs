//! API routes for deskmated

use crate::completion::CompletionError;
use crate::gateway::GatewayError;
use crate::server::AppState;
use crate::turn::{Prepared, TurnError, TurnReply, TurnRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use deskmate_shared::host::session::{AUTH_REQUEST, RECORD_REQUEST};
use deskmate_shared::host::OriginAllowList;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

type AppStateArc = Arc<AppState>;

/// Events buffered between the provider stream and the client
const SSE_BUFFER: usize = 32;

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Host Channel Routes
// ============================================================================

/// What the embedded pod needs before it starts its host session
#[derive(Debug, Serialize, Deserialize)]
pub struct HostChannelResponse {
    pub allowed_origins: OriginAllowList,
    pub auth_request: String,
    pub record_request: String,
}

pub fn host_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/host", get(host_channel))
}

async fn host_channel(State(state): State<AppStateArc>) -> Json<HostChannelResponse> {
    Json(HostChannelResponse {
        allowed_origins: state.host.allowed_origins.clone(),
        auth_request: AUTH_REQUEST.to_string(),
        record_request: RECORD_REQUEST.to_string(),
    })
}

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
}

/// Map a failed turn to a status. Upstream status and message pass through.
pub fn error_response(err: &TurnError) -> (StatusCode, String) {
    match err {
        TurnError::Gateway(GatewayError::Timeout(_))
        | TurnError::Completion(CompletionError::Timeout(_)) => {
            (StatusCode::GATEWAY_TIMEOUT, err.to_string())
        }
        TurnError::Gateway(GatewayError::Status { status, message }) => (
            StatusCode::BAD_GATEWAY,
            format!("Ticket system returned {}: {}", status, message),
        ),
        TurnError::Completion(CompletionError::Status { status, message }) => (
            StatusCode::BAD_GATEWAY,
            format!("AI provider returned {}: {}", status, message),
        ),
        _ => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

fn reject(ticket_id: i64, err: TurnError) -> (StatusCode, String) {
    error!("  Turn on ticket {} failed: {}", ticket_id, err);
    error_response(&err)
}

async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnReply>, (StatusCode, String)> {
    state
        .engine
        .run(&req)
        .await
        .map(Json)
        .map_err(|e| reject(req.ticket_id, e))
}

fn json_event(name: &str, value: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Stream a turn as server-sent events.
///
/// Short-circuit replies arrive as a single `reply` event. Provider answers
/// arrive as `start` (turn id), any number of `chunk`, then `done` or `error`.
async fn chat_stream(
    State(state): State<AppStateArc>,
    Json(req): Json<TurnRequest>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>,
    (StatusCode, String),
> {
    let (tx, rx) = mpsc::channel::<Event>(SSE_BUFFER);

    match state
        .engine
        .prepare(&req)
        .await
        .map_err(|e| reject(req.ticket_id, e))?
    {
        Prepared::Reply(reply) => {
            // Fresh channel with spare capacity
            let _ = tx.try_send(json_event("reply", &reply));
        }
        Prepared::Prompt { turn_id, messages } => {
            let mut chunks = state
                .engine
                .stream(&messages)
                .await
                .map_err(|e| reject(req.ticket_id, e))?;

            tokio::spawn(async move {
                let start = serde_json::json!({ "turn_id": turn_id });
                if tx.send(json_event("start", &start)).await.is_err() {
                    return;
                }
                while let Some(chunk) = chunks.recv().await {
                    let event = match chunk {
                        Ok(text) => Event::default().event("chunk").data(text),
                        Err(e) => {
                            warn!("Turn {} stream failed: {}", turn_id, e);
                            let _ = tx.send(Event::default().event("error").data(e.to_string())).await;
                            return;
                        }
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(Event::default().event("done").data(turn_id.to_string())).await;
            });
        }
    }

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gateway_status_passes_through() {
        let err = TurnError::Gateway(GatewayError::Status {
            status: 404,
            message: "Ticket 9 not found".into(),
        });
        assert_eq!(
            error_response(&err),
            (
                StatusCode::BAD_GATEWAY,
                "Ticket system returned 404: Ticket 9 not found".to_string()
            )
        );
    }

    #[test]
    fn test_timeouts_map_to_504() {
        let (status, body) = error_response(&TurnError::Gateway(GatewayError::Timeout(
            Duration::from_millis(500),
        )));
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body, "gateway call timed out after 500ms");

        let timeout = CompletionError::Timeout(Duration::from_secs(60));
        let (status, _) = error_response(&TurnError::Completion(timeout));
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_provider_errors_are_bad_gateway() {
        let (status, body) = error_response(&TurnError::Completion(CompletionError::EmptyResponse));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, "provider returned an empty completion");
    }
}
