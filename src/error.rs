//! Error types for the mail triage service.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Token acquisition errors, shared by the mailbox and store clients.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Token request rejected: {0}")]
    Rejected(String),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// Mailbox fetch errors. A fetch failure aborts the whole batch; no
/// baseline rows have been written yet for unfetched messages.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Mailbox {mailbox} unreachable: {reason}")]
    Unreachable { mailbox: String, reason: String },

    #[error("Authentication failed for mailbox {mailbox}: {reason}")]
    AuthFailed { mailbox: String, reason: String },

    #[error("Invalid message payload: {0}")]
    InvalidPayload(String),
}

/// Per-attachment extraction errors. Never fatal: the pipeline degrades
/// to empty text and classifies on whatever is available.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Corrupt attachment {attachment_id}: {reason}")]
    Corrupt {
        attachment_id: String,
        reason: String,
    },
}

/// Errors from the external extractor/classification service.
///
/// `is_transient()` decides whether a later delivery could still succeed.
/// `CircuitOpen` counts as transient for the caller's taxonomy but is
/// never retried in place: the breaker already decided the dependency
/// is down.
#[derive(Debug, thiserror::Error)]
pub enum ExternalServiceError {
    #[error("Transient extractor failure: {0}")]
    Transient(String),

    #[error("Permanent extractor failure: {0}")]
    Permanent(String),

    #[error("Extractor request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit breaker open, extractor call rejected")]
    CircuitOpen,
}

impl ExternalServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout(_) | Self::CircuitOpen
        )
    }

    /// Whether the resilient client should retry this attempt in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Record store errors (create or patch).
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Store rejected write for {message_id}: {reason}")]
    WriteRejected { message_id: String, reason: String },

    #[error("Authentication failed against store: {0}")]
    AuthFailed(String),

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
