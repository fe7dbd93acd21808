//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Retry/backoff settings for the extractor client.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Base delay, doubled each attempt (default: 1s).
    pub backoff_base: Duration,
    /// Backoff cap (default: 30s).
    pub backoff_cap: Duration,
    /// Random 0..jitter_fraction of the delay is added (default: 0.25).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

/// Circuit breaker settings (shared across all extractor callers).
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens (default: 5).
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial
    /// request (default: 30s).
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Extractor service settings.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Base URL of the extractor service (e.g. `http://extractor:8000`).
    pub base_url: String,
    /// Path of the extraction endpoint.
    pub extract_path: String,
    /// Per-attempt request timeout. A response arriving later is discarded.
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            extract_path: "/extract".into(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// OAuth client-credentials settings for the mailbox and store APIs.
#[derive(Clone)]
pub struct TokenConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: String,
}

/// Full service configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Mailbox identifier used in fetch paths and log context.
    pub mailbox: String,
    /// Messages endpoint base URL (required at startup).
    pub mail_api_url: String,
    /// Record store base URL (empty selects the in-memory store).
    pub store_url: String,
    /// Logical table name inside the store.
    pub store_table: String,
    pub extractor: ExtractorConfig,
    /// Number of enrichment workers.
    pub worker_count: usize,
    /// HTTP bind address.
    pub bind_addr: String,
    /// Token endpoint credentials, when the external APIs need them.
    pub token: Option<TokenConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mailbox: "inbox".into(),
            mail_api_url: String::new(),
            store_url: String::new(),
            store_table: "emails".into(),
            extractor: ExtractorConfig::default(),
            worker_count: 4,
            bind_addr: "0.0.0.0:8080".into(),
            token: None,
        }
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl AppConfig {
    /// Build configuration from the environment. Every knob has a
    /// default; missing external URLs degrade to local/in-memory
    /// implementations instead of failing startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry = RetryConfig {
            max_attempts: std::env::var("EXTRACTOR_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            backoff_base: env_duration_secs("EXTRACTOR_BACKOFF_BASE_SECS", Duration::from_secs(1)),
            backoff_cap: env_duration_secs("EXTRACTOR_BACKOFF_CAP_SECS", Duration::from_secs(30)),
            jitter_fraction: 0.25,
        };

        let breaker = BreakerConfig {
            failure_threshold: std::env::var("EXTRACTOR_BREAKER_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            cooldown: env_duration_secs("EXTRACTOR_BREAKER_COOLDOWN_SECS", Duration::from_secs(30)),
        };

        let extractor = ExtractorConfig {
            base_url: std::env::var("EXTRACTOR_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            extract_path: std::env::var("EXTRACTOR_EXTRACT_PATH")
                .unwrap_or_else(|_| "/extract".into()),
            request_timeout: env_duration_secs("EXTRACTOR_TIMEOUT_SECS", Duration::from_secs(30)),
            retry,
            breaker,
        };

        let token = std::env::var("TOKEN_URL").ok().map(|token_url| TokenConfig {
            token_url,
            client_id: std::env::var("CLIENT_ID").unwrap_or_default(),
            client_secret: SecretString::from(
                std::env::var("CLIENT_SECRET").unwrap_or_default(),
            ),
            scope: std::env::var("TOKEN_SCOPE").unwrap_or_default(),
        });

        Self {
            mailbox: std::env::var("MAILBOX").unwrap_or(defaults.mailbox),
            mail_api_url: std::env::var("MAIL_API_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            store_url: std::env::var("STORE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            store_table: std::env::var("STORE_TABLE").unwrap_or(defaults.store_table),
            extractor,
            worker_count: std::env::var("ENRICHMENT_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_count),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            token,
        }
    }
}
