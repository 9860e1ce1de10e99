//! Typed wrapper over Transport (§4.C): `create_event`, `create_events`,
//! auth header composition, and per-request retry of transient HTTP status.

use crate::backoff::Backoff;
use crate::error::EventLoggerError;
use crate::event::Event;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::token_provider::TokenProvider;
use crate::transport::{Transport, TransportRequest};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventResponse {
    pub execution_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchErrorEntry {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventsResponse {
    pub execution_ids: Vec<String>,
    #[serde(default)]
    pub errors: Vec<BatchErrorEntry>,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    execution_ids: Vec<String>,
    #[serde(default)]
    errors: Vec<BatchErrorEntry>,
    #[serde(default)]
    error: Option<String>,
}

/// Per-request retry budget for transient HTTP glitches within a single
/// send. Distinct from the event-level retry in the sender/retry scheduler,
/// which handles repeated full failures of whole sends.
const DEFAULT_MAX_RETRIES: u32 = 3;

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    token_provider: Arc<dyn TokenProvider>,
    base_url: String,
    application_id: Option<String>,
    request_timeout: Duration,
    max_retries: u32,
    sleeper: Arc<dyn Sleeper>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        token_provider: Arc<dyn TokenProvider>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_provider,
            base_url: base_url.into(),
            application_id: None,
            request_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    #[cfg(test)]
    fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub async fn create_event(
        &self,
        event: &Event,
    ) -> Result<CreateEventResponse, EventLoggerError> {
        let body = json!({ "events": event }).to_string().into_bytes();
        let raw = self.send_with_retry("/v1/events", body).await?;
        Ok(CreateEventResponse { execution_ids: raw.execution_ids })
    }

    pub async fn create_events(
        &self,
        events: &[Event],
    ) -> Result<CreateEventsResponse, EventLoggerError> {
        let body = json!({ "events": events }).to_string().into_bytes();
        let raw = self.send_with_retry("/v1/events/batch", body).await?;
        Ok(CreateEventsResponse { execution_ids: raw.execution_ids, errors: raw.errors })
    }

    /// Events previously ingested for one account. A thin read helper (§4.C)
    /// — never called by the delivery core itself.
    pub async fn get_events_by_account(
        &self,
        account_id: &str,
    ) -> Result<serde_json::Value, EventLoggerError> {
        self.get(&format!("/v1/events/account/{}", account_id)).await
    }

    /// Events sharing one correlation id. Thin read helper (§4.C).
    pub async fn get_events_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<serde_json::Value, EventLoggerError> {
        self.get(&format!("/v1/events/correlation/{}", correlation_id)).await
    }

    /// Events sharing one trace id. Thin read helper (§4.C).
    pub async fn get_events_by_trace(
        &self,
        trace_id: &str,
    ) -> Result<serde_json::Value, EventLoggerError> {
        self.get(&format!("/v1/events/trace/{}", trace_id)).await
    }

    /// The stored result of one batch ingest. Thin read helper (§4.C).
    pub async fn get_batch(&self, batch_id: &str) -> Result<serde_json::Value, EventLoggerError> {
        self.get(&format!("/v1/events/batch/{}", batch_id)).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, EventLoggerError> {
        let bytes = self.send_with_retry_raw(http::Method::GET, path, Vec::new()).await?;
        serde_json::from_slice(&bytes).map_err(EventLoggerError::Serialization)
    }

    async fn send_with_retry(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> Result<RawResponse, EventLoggerError> {
        let bytes = self.send_with_retry_raw(http::Method::POST, path, body).await?;
        serde_json::from_slice(&bytes).map_err(EventLoggerError::Serialization)
    }

    async fn send_with_retry_raw(
        &self,
        method: http::Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, EventLoggerError> {
        let backoff = Backoff::linear(Duration::from_millis(100)).with_max(Duration::from_secs(5));
        let mut attempt: u32 = 0;

        loop {
            match self.send_once(method.clone(), path, body.clone()).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if attempt < self.max_retries && Self::is_retryable(&err) => {
                    attempt += 1;
                    let delay = backoff.delay(attempt as usize);
                    tracing::debug!(attempt, path, "api client retrying after transient error");
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_retryable(err: &EventLoggerError) -> bool {
        matches!(err, EventLoggerError::Transport(_)) || err.is_retryable_api_error()
    }

    async fn send_once(
        &self,
        method: http::Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, EventLoggerError> {
        let token = self.token_provider.get_token().await?;
        let mut request =
            TransportRequest::new(method, format!("{}{}", self.base_url, path), self.request_timeout)
                .with_header("Accept", "application/json")
                .with_header("Content-Type", "application/json")
                .with_header("Authorization", format!("Bearer {}", token));
        if !body.is_empty() {
            request = request.with_body(body);
        }

        if let Some(app_id) = &self.application_id {
            request = request.with_header("X-Application-Id", app_id);
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| EventLoggerError::Transport(e.0))?;

        if response.is_success() {
            Ok(response.body)
        } else {
            let body_str = response.body_str();
            let error_code = serde_json::from_str::<RawResponse>(&body_str)
                .ok()
                .and_then(|r| r.error);
            Err(EventLoggerError::Api { status_code: response.status_code, body: body_str, error_code })
        }
    }
}
