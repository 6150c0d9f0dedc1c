//! Upstream ticket gateway.
//!
//! Read-only access to tickets, notes and configurations in the PSA host.
//! `HttpGateway` talks to the real REST API; `FakeGateway` serves canned
//! records for tests.

use async_trait::async_trait;
use deskmate_shared::records::sort_chronologically;
use deskmate_shared::{ConfigurationRecord, NoteRecord, TicketRecord};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway response not understood: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether repeating the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Decode(_) => false,
        }
    }
}

/// Paging and projection for `search_tickets`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub order_by: String,
    pub page_size: usize,
    pub fields: Vec<String>,
}

impl SearchOptions {
    /// Newest first, trimmed to what ranking and the summary block read
    pub fn similarity(page_size: usize) -> Self {
        Self {
            order_by: "dateEntered desc".to_string(),
            page_size,
            fields: [
                "id",
                "summary",
                "status",
                "company",
                "board",
                "priority",
                "dateEntered",
                "closedDate",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
        }
    }
}

#[async_trait]
pub trait TicketGateway: Send + Sync {
    async fn get_ticket(&self, id: i64) -> Result<TicketRecord, GatewayError>;

    async fn get_notes(&self, ticket_id: i64) -> Result<Vec<NoteRecord>, GatewayError>;

    async fn get_configurations(
        &self,
        ticket_id: i64,
    ) -> Result<Vec<ConfigurationRecord>, GatewayError>;

    async fn search_tickets(
        &self,
        conditions: &str,
        options: &SearchOptions,
    ) -> Result<Vec<TicketRecord>, GatewayError>;

    async fn get_configuration(&self, id: i64) -> Result<ConfigurationRecord, GatewayError>;
}

/// Bound a gateway call; a timeout is reported as a retryable error
pub async fn timed<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Everything fetched about one ticket for a single turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketBundle {
    pub ticket: TicketRecord,
    /// Ascending by creation time
    pub notes: Vec<NoteRecord>,
    pub configurations: Vec<ConfigurationRecord>,
}

/// Fetch ticket, notes and configurations concurrently. Any failure fails
/// the whole bundle.
pub async fn fetch_bundle(
    gateway: &dyn TicketGateway,
    ticket_id: i64,
    limit: Duration,
) -> Result<TicketBundle, GatewayError> {
    let (ticket, mut notes, configurations) = tokio::try_join!(
        timed(limit, gateway.get_ticket(ticket_id)),
        timed(limit, gateway.get_notes(ticket_id)),
        timed(limit, gateway.get_configurations(ticket_id)),
    )?;
    sort_chronologically(&mut notes);
    debug!(
        "Fetched ticket {} with {} notes and {} configurations",
        ticket_id,
        notes.len(),
        configurations.len()
    );
    Ok(TicketBundle {
        ticket,
        notes,
        configurations,
    })
}

// ============================================================================
// HTTP gateway
// ============================================================================

pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let username = format!("{}+{}", self.config.company, self.config.public_key);
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .basic_auth(username, Some(&self.config.private_key))
            .header("clientId", &self.config.client_id)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.config.timeout())
                } else {
                    GatewayError::Transport(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: error_message(&body, status.canonical_reason()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{} {}: {}", path, status, e)))
    }
}

/// Pull the host's `message` out of an error body, else use the raw text
fn error_message(body: &str, reason: Option<&str>) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => reason.unwrap_or("unknown error").to_string(),
    }
}

#[async_trait]
impl TicketGateway for HttpGateway {
    async fn get_ticket(&self, id: i64) -> Result<TicketRecord, GatewayError> {
        self.get_json(&format!("/service/tickets/{}", id), &[]).await
    }

    async fn get_notes(&self, ticket_id: i64) -> Result<Vec<NoteRecord>, GatewayError> {
        self.get_json(
            &format!("/service/tickets/{}/notes", ticket_id),
            &[("pageSize", "1000".to_string())],
        )
        .await
    }

    async fn get_configurations(
        &self,
        ticket_id: i64,
    ) -> Result<Vec<ConfigurationRecord>, GatewayError> {
        self.get_json(
            &format!("/service/tickets/{}/configurations", ticket_id),
            &[("pageSize", "100".to_string())],
        )
        .await
    }

    async fn search_tickets(
        &self,
        conditions: &str,
        options: &SearchOptions,
    ) -> Result<Vec<TicketRecord>, GatewayError> {
        let query = [
            ("conditions", conditions.to_string()),
            ("orderBy", options.order_by.clone()),
            ("pageSize", options.page_size.to_string()),
            ("fields", options.fields.join(",")),
        ];
        self.get_json("/service/tickets", &query).await
    }

    async fn get_configuration(&self, id: i64) -> Result<ConfigurationRecord, GatewayError> {
        self.get_json(&format!("/company/configurations/{}", id), &[])
            .await
    }
}

// ============================================================================
// Fake gateway (tests)
// ============================================================================

/// In-memory gateway with call recording and failure injection
#[derive(Default)]
pub struct FakeGateway {
    tickets: HashMap<i64, TicketRecord>,
    notes: HashMap<i64, Vec<NoteRecord>>,
    configurations: HashMap<i64, Vec<ConfigurationRecord>>,
    configuration_details: HashMap<i64, ConfigurationRecord>,
    search_results: Mutex<VecDeque<Result<Vec<TicketRecord>, GatewayError>>>,
    failing_notes: HashSet<i64>,
    searches: Mutex<Vec<(String, SearchOptions)>>,
    calls: Mutex<usize>,
    delay: Option<Duration>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, ticket: TicketRecord) -> Self {
        self.tickets.insert(ticket.id, ticket);
        self
    }

    pub fn with_notes(mut self, ticket_id: i64, notes: Vec<NoteRecord>) -> Self {
        self.notes.insert(ticket_id, notes);
        self
    }

    pub fn with_configurations(mut self, ticket_id: i64, configs: Vec<ConfigurationRecord>) -> Self {
        self.configurations.insert(ticket_id, configs);
        self
    }

    pub fn with_configuration_detail(mut self, config: ConfigurationRecord) -> Self {
        self.configuration_details.insert(config.id, config);
        self
    }

    /// Queue the result of the next search call; unqueued searches return nothing
    pub fn with_search_result(self, result: Result<Vec<TicketRecord>, GatewayError>) -> Self {
        self.search_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }

    pub fn with_failing_notes(mut self, ticket_id: i64) -> Self {
        self.failing_notes.insert(ticket_id);
        self
    }

    /// Make every call sleep first, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn searches(&self) -> Vec<(String, SearchOptions)> {
        self.searches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn touch(&self) {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn not_found(kind: &str, id: i64) -> GatewayError {
        GatewayError::Status {
            status: 404,
            message: format!("{} {} not found", kind, id),
        }
    }
}

#[async_trait]
impl TicketGateway for FakeGateway {
    async fn get_ticket(&self, id: i64) -> Result<TicketRecord, GatewayError> {
        self.touch().await;
        self.tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found("Ticket", id))
    }

    async fn get_notes(&self, ticket_id: i64) -> Result<Vec<NoteRecord>, GatewayError> {
        self.touch().await;
        if self.failing_notes.contains(&ticket_id) {
            return Err(GatewayError::Status {
                status: 500,
                message: "notes unavailable".to_string(),
            });
        }
        Ok(self.notes.get(&ticket_id).cloned().unwrap_or_default())
    }

    async fn get_configurations(
        &self,
        ticket_id: i64,
    ) -> Result<Vec<ConfigurationRecord>, GatewayError> {
        self.touch().await;
        Ok(self
            .configurations
            .get(&ticket_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_tickets(
        &self,
        conditions: &str,
        options: &SearchOptions,
    ) -> Result<Vec<TicketRecord>, GatewayError> {
        self.touch().await;
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((conditions.to_string(), options.clone()));
        let next = self
            .search_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(mut tickets)) => {
                tickets.truncate(options.page_size);
                Ok(tickets)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn get_configuration(&self, id: i64) -> Result<ConfigurationRecord, GatewayError> {
        self.touch().await;
        self.configuration_details
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found("Configuration", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn note(id: i64, hour: u32) -> NoteRecord {
        NoteRecord {
            id,
            created_at: Some(Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bundle_sorts_notes() {
        let gateway = FakeGateway::new()
            .with_ticket(TicketRecord { id: 1, ..Default::default() })
            .with_notes(1, vec![note(3, 12), note(1, 8), note(2, 10)]);

        let bundle = fetch_bundle(&gateway, 1, Duration::from_secs(5)).await.unwrap();
        let ids: Vec<i64> = bundle.notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test]
    async fn test_bundle_fails_as_a_whole() {
        let gateway = FakeGateway::new()
            .with_ticket(TicketRecord { id: 1, ..Default::default() })
            .with_failing_notes(1);

        let err = fetch_bundle(&gateway, 1, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Status {
                status: 500,
                message: "notes unavailable".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let gateway = FakeGateway::new()
            .with_ticket(TicketRecord { id: 1, ..Default::default() })
            .with_delay(Duration::from_millis(200));

        let err = fetch_bundle(&gateway, 1, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(20)));
        assert_eq!(err.to_string(), "gateway call timed out after 20ms");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_message_prefers_host_message() {
        assert_eq!(
            error_message(r#"{"code":"NotFound","message":"Ticket 9 not found"}"#, Some("Not Found")),
            "Ticket 9 not found"
        );
        assert_eq!(error_message("", Some("Bad Gateway")), "Bad Gateway");
        assert_eq!(error_message("plain text", None), "plain text");
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        assert!(!FakeGateway::not_found("Ticket", 1).is_retryable());
    }
}
