//! Mailbox access: token acquisition and message fetching.
//!
//! Both are external collaborators: the pipeline only depends on the
//! [`TokenProvider`] and [`MailFetcher`] traits. The HTTP
//! implementations here target a Graph-style JSON API and keep the
//! transport details out of the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TokenConfig;
use crate::error::{AuthError, FetchError};
use crate::model::{Attachment, EmailMessage};

/// Refresh tokens this long before their reported expiry.
const EXPIRY_SLACK_SECS: i64 = 60;

/// A bearer credential with its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub secret: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Expired or about to expire; callers should re-acquire.
    pub fn is_stale(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(EXPIRY_SLACK_SECS) >= self.expires_at
    }
}

/// Supplies valid bearer credentials for the mailbox and store APIs.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self) -> Result<AccessToken, AuthError>;
}

/// Fixed token, for tests and local development.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self) -> Result<AccessToken, AuthError> {
        Ok(AccessToken {
            secret: self.token.clone(),
            expires_at: Utc::now() + ChronoDuration::hours(24),
        })
    }
}

/// Client-credentials flow against an OAuth token endpoint, caching the
/// token until shortly before expiry.
pub struct ClientCredentialsProvider {
    config: TokenConfig,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl ClientCredentialsProvider {
    pub fn new(config: TokenConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cached: Mutex::new(None),
        }
    }

    async fn request_token(&self) -> Result<AccessToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(format!("{status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        Ok(AccessToken {
            secret: SecretString::from(token.access_token),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn acquire(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && !token.is_stale()
        {
            return Ok(token.clone());
        }

        debug!(token_url = %self.config.token_url, "Acquiring fresh access token");
        let token = self.request_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

// ── Mail fetching ───────────────────────────────────────────────────

/// Yields raw messages with attachments for a mailbox.
#[async_trait]
pub trait MailFetcher: Send + Sync {
    async fn fetch_batch(&self) -> Result<Vec<EmailMessage>, FetchError>;
}

/// Wire shape of one message from the mail API.
#[derive(serde::Deserialize)]
struct WireMessage {
    id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body_text: String,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(serde::Deserialize)]
struct WireAttachment {
    id: String,
    name: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content_bytes: String,
}

#[derive(serde::Deserialize)]
struct WireBatch {
    #[serde(default)]
    value: Vec<WireMessage>,
}

/// JSON-over-HTTP fetcher against a Graph-style messages endpoint.
pub struct HttpMailFetcher {
    base_url: String,
    mailbox: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpMailFetcher {
    pub fn new(
        base_url: impl Into<String>,
        mailbox: impl Into<String>,
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            mailbox: mailbox.into(),
            http,
            tokens,
        }
    }

    fn convert(&self, wire: WireMessage) -> EmailMessage {
        let attachments = wire
            .attachments
            .into_iter()
            .map(|a| {
                use base64::Engine;
                let data = base64::engine::general_purpose::STANDARD
                    .decode(a.content_bytes.as_bytes())
                    .unwrap_or_else(|e| {
                        warn!(attachment_id = %a.id, error = %e, "Undecodable attachment bytes");
                        Vec::new()
                    });
                Attachment {
                    id: a.id,
                    name: a.name,
                    content_type: a.content_type,
                    data,
                }
            })
            .collect();

        EmailMessage {
            id: wire.id,
            sender: wire.sender,
            subject: wire.subject,
            body: wire.body_text,
            attachments,
            received_at: wire.received_at.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl MailFetcher for HttpMailFetcher {
    async fn fetch_batch(&self) -> Result<Vec<EmailMessage>, FetchError> {
        let token = self.tokens.acquire().await.map_err(|e| FetchError::AuthFailed {
            mailbox: self.mailbox.clone(),
            reason: e.to_string(),
        })?;

        let url = format!("{}/{}/messages", self.base_url, self.mailbox);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret.expose_secret())
            .send()
            .await
            .map_err(|e| FetchError::Unreachable {
                mailbox: self.mailbox.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::AuthFailed {
                mailbox: self.mailbox.clone(),
                reason: format!("mail API returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable {
                mailbox: self.mailbox.clone(),
                reason: format!("mail API returned {status}"),
            });
        }

        let batch: WireBatch = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidPayload(e.to_string()))?;

        let messages: Vec<EmailMessage> =
            batch.value.into_iter().map(|m| self.convert(m)).collect();
        info!(mailbox = %self.mailbox, count = messages.len(), "Fetched mail batch");
        Ok(messages)
    }
}
