//! Token providers (§4.B): a fixed bearer token, or an OAuth2
//! client-credentials provider with caching and single-flight refresh.

use crate::config::OAuthConfig;
use crate::error::EventLoggerError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<String, EventLoggerError>;

    /// Drop any cached token; the next `get_token()` call refetches.
    async fn invalidate_token(&self) {}
}

/// Returns a fixed bearer token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Result<Self, EventLoggerError> {
        let token = token.into();
        if token.is_empty() {
            return Err(EventLoggerError::Config("static token must not be empty".into()));
        }
        Ok(Self { token })
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<String, EventLoggerError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// OAuth2 client-credentials provider with a lazy, on-demand, single-flight
/// refresh: concurrent callers arriving during a refresh share it rather than
/// triggering independent requests (§4.B).
pub struct OAuthTokenProvider {
    config: OAuthConfig,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl OAuthTokenProvider {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    fn is_fresh(cached: &CachedToken, refresh_buffer: Duration) -> bool {
        Instant::now() + refresh_buffer < cached.expires_at
    }

    async fn read_if_fresh(&self) -> Option<String> {
        let guard = self.cached.read().await;
        guard
            .as_ref()
            .filter(|cached| Self::is_fresh(cached, self.config.refresh_buffer))
            .map(|cached| cached.access_token.clone())
    }

    async fn refresh(&self) -> Result<String, EventLoggerError> {
        let mut body = String::from("grant_type=client_credentials");
        if let Some(scope) = &self.config.scope {
            body.push_str(&format!("&scope={}", scope));
        }

        let basic = BASE64_STANDARD
            .encode(format!("{}:{}", self.config.client_id, self.config.client_secret));

        let response = self
            .http
            .post(&self.config.token_url)
            .header("Authorization", format!("Basic {}", basic))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .timeout(self.config.request_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| EventLoggerError::Authentication(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EventLoggerError::Authentication(format!(
                "token endpoint returned status {}",
                response.status()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|_| EventLoggerError::Authentication("missing access_token".into()))?;

        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let fresh =
            CachedToken { access_token: parsed.access_token, expires_at: Instant::now() + Duration::from_secs(expires_in) };

        let token = fresh.access_token.clone();
        *self.cached.write().await = Some(fresh);
        tracing::debug!(expires_in, "oauth token refreshed");
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn get_token(&self) -> Result<String, EventLoggerError> {
        if let Some(token) = self.read_if_fresh().await {
            return Ok(token);
        }

        // Single-flight: only one caller performs the refresh; everyone else
        // blocks here and then re-checks under the now-updated cache.
        let _guard = self.refresh_lock.lock().await;

        // Double-checked: another caller may have refreshed while we waited
        // for the refresh lock.
        if let Some(token) = self.read_if_fresh().await {
            return Ok(token);
        }

        self.refresh().await
    }

    async fn invalidate_token(&self) {
        *self.cached.write().await = None;
    }
}
