//! Resilient client for the external extractor service.
//!
//! [`ExtractorClient`] wraps an [`ExtractorBackend`] (the single
//! network seam) with the full resilience stack: per-attempt timeout,
//! bounded retries with exponential backoff and jitter, and a shared
//! circuit breaker. It must never block a worker indefinitely and
//! never amplify load on a failing dependency: a rejected (breaker-open)
//! attempt makes no network call and is not retried in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{ExtractorConfig, RetryConfig};
use crate::enrichment::breaker::CircuitBreaker;
use crate::error::ExternalServiceError;
use crate::model::{Category, ClassificationResult, ClassificationSource, Priority};

/// One extractor call: text in, classification out. Implementations do
/// a single attempt; the resilience logic lives in [`ExtractorClient`].
#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassificationResult, ExternalServiceError>;
}

/// Delay before retry attempt `n` (0-indexed): `base * 2^n` capped,
/// plus a random 0..jitter_fraction of that so synchronized workers
/// don't retry in lockstep.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = config.backoff_base.as_millis() as u64;
    let raw_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = raw_ms.min(config.backoff_cap.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_max_ms)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// Resilient extractor client. Cheap to clone via `Arc` fields; all
/// clones share the one breaker.
pub struct ExtractorClient<B> {
    backend: B,
    request_timeout: Duration,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl<B: ExtractorBackend> ExtractorClient<B> {
    pub fn new(
        backend: B,
        request_timeout: Duration,
        retry: RetryConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            backend,
            request_timeout,
            retry,
            breaker,
        }
    }

    /// Classify text through the external service.
    ///
    /// Per attempt: consult the breaker, run the backend call under the
    /// request timeout, and feed the outcome back to the breaker. A
    /// response arriving after the timeout is discarded. Transient
    /// failures are retried up to `max_attempts` with backoff; breaker
    /// rejections and permanent failures propagate immediately.
    pub async fn classify_external(
        &self,
        text: &str,
    ) -> Result<ClassificationResult, ExternalServiceError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = compute_delay(&self.retry, attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before extractor retry"
                );
                tokio::time::sleep(delay).await;
            }

            // Fail fast while the dependency is down; no network call.
            self.breaker.check()?;

            let outcome =
                tokio::time::timeout(self.request_timeout, self.backend.classify(text)).await;

            let err = match outcome {
                Ok(Ok(result)) => {
                    self.breaker.record_success();
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Extractor call succeeded after retry");
                    }
                    return Ok(result);
                }
                Ok(Err(err)) => err,
                Err(_) => ExternalServiceError::Timeout(self.request_timeout),
            };

            self.breaker.record_failure();
            attempt += 1;

            if !err.is_retryable() || attempt == max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "Extractor call failed, not retrying"
                );
                return Err(err);
            }

            warn!(attempt, error = %err, "Transient extractor failure, will retry");
        }
    }
}

// ── HTTP backend ────────────────────────────────────────────────────

/// Wire shape of the extractor response. The service may wrap the
/// payload in a `data` envelope.
#[derive(serde::Deserialize)]
struct WireClassification {
    category: String,
    priority: String,
    #[serde(default)]
    confidence: f32,
}

/// HTTP backend posting `{ body_text }` to the extractor endpoint.
pub struct HttpExtractorBackend {
    url: String,
    http: reqwest::Client,
}

impl HttpExtractorBackend {
    pub fn new(config: &ExtractorConfig, http: reqwest::Client) -> Self {
        Self {
            url: format!("{}{}", config.base_url, config.extract_path),
            http,
        }
    }

    fn parse_body(body: serde_json::Value) -> Result<ClassificationResult, ExternalServiceError> {
        let payload = body.get("data").cloned().unwrap_or(body);
        let wire: WireClassification = serde_json::from_value(payload)
            .map_err(|e| ExternalServiceError::Permanent(format!("undecodable response: {e}")))?;

        let category = Category::parse(&wire.category).ok_or_else(|| {
            ExternalServiceError::Permanent(format!("unknown category label: {}", wire.category))
        })?;
        let priority = Priority::parse(&wire.priority).ok_or_else(|| {
            ExternalServiceError::Permanent(format!("unknown priority label: {}", wire.priority))
        })?;

        Ok(ClassificationResult::new(
            category,
            priority,
            wire.confidence,
            ClassificationSource::External,
        ))
    }
}

#[async_trait]
impl ExtractorBackend for HttpExtractorBackend {
    async fn classify(&self, text: &str) -> Result<ClassificationResult, ExternalServiceError> {
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "body_text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalServiceError::Transient(format!("request timeout: {e}"))
                } else {
                    ExternalServiceError::Transient(format!("connection error: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ExternalServiceError::Transient(format!(
                "extractor returned {status}"
            )));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Permanent(format!(
                "extractor returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            ExternalServiceError::Permanent(format!("undecodable response body: {e}"))
        })?;
        Self::parse_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::config::BreakerConfig;
    use crate::enrichment::breaker::BreakerState;

    /// Backend that fails `failures` times before succeeding.
    struct FlakyBackend {
        remaining_failures: AtomicU32,
        calls: AtomicU32,
        error: fn() -> ExternalServiceError,
    }

    impl FlakyBackend {
        fn new(failures: u32, error: fn() -> ExternalServiceError) -> Self {
            Self {
                remaining_failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                error,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn success() -> ClassificationResult {
            ClassificationResult::new(
                Category::CustomerRequest,
                Priority::Medium,
                0.93,
                ClassificationSource::External,
            )
        }
    }

    #[async_trait]
    impl ExtractorBackend for FlakyBackend {
        async fn classify(
            &self,
            _text: &str,
        ) -> Result<ClassificationResult, ExternalServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(Self::success())
        }
    }

    /// Backend that never responds (forces the client-side timeout).
    struct HangingBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ExtractorBackend for HangingBackend {
        async fn classify(
            &self,
            _text: &str,
        ) -> Result<ClassificationResult, ExternalServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            jitter_fraction: 0.0,
        }
    }

    fn wide_breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 100,
            cooldown: Duration::from_secs(60),
        }))
    }

    fn client<B: ExtractorBackend>(
        backend: B,
        max_attempts: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> ExtractorClient<B> {
        ExtractorClient::new(
            backend,
            Duration::from_millis(50),
            fast_retry(max_attempts),
            breaker,
        )
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let client = client(FlakyBackend::new(0, || unreachable!()), 3, wide_breaker());
        let result = client.classify_external("text").await.unwrap();
        assert_eq!(result.source, ClassificationSource::External);
        assert_eq!(client.backend.calls(), 1);
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt_after_transient() {
        let client = client(
            FlakyBackend::new(1, || ExternalServiceError::Transient("503".into())),
            3,
            wide_breaker(),
        );
        let result = client.classify_external("text").await.unwrap();
        assert_eq!(result.category, Category::CustomerRequest);
        assert_eq!(client.backend.calls(), 2);
    }

    #[tokio::test]
    async fn retries_exactly_max_attempts_then_fails() {
        let client = client(
            FlakyBackend::new(10, || ExternalServiceError::Transient("502".into())),
            3,
            wide_breaker(),
        );
        let err = client.classify_external("text").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let client = client(
            FlakyBackend::new(10, || ExternalServiceError::Permanent("400".into())),
            3,
            wide_breaker(),
        );
        let err = client.classify_external("text").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(client.backend.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_transient_and_retries() {
        let backend = HangingBackend {
            calls: AtomicU32::new(0),
        };
        let client = client(backend, 3, wide_breaker());
        let err = client.classify_external("text").await.unwrap_err();
        assert!(matches!(err, ExternalServiceError::Timeout(_)));
        assert_eq!(client.backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_opens_and_blocks_without_network() {
        let breaker = Arc::new(CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }));
        let client = client(
            FlakyBackend::new(100, || ExternalServiceError::Transient("503".into())),
            3,
            Arc::clone(&breaker),
        );

        // First call burns 3 attempts and opens the breaker.
        client.classify_external("text").await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(client.backend.calls(), 3);

        // Second call is rejected up-front, no backend invocation.
        let err = client.classify_external("text").await.unwrap_err();
        assert!(matches!(err, ExternalServiceError::CircuitOpen));
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test]
    async fn half_open_trial_success_closes_breaker() {
        let breaker = Arc::new(CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(0),
        }));
        let client = client(
            FlakyBackend::new(1, || ExternalServiceError::Transient("503".into())),
            1,
            Arc::clone(&breaker),
        );

        client.classify_external("text").await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Cooldown of zero: next call is the half-open trial and succeeds.
        client.classify_external("text").await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(300),
            jitter_fraction: 0.0,
        };
        assert_eq!(compute_delay(&config, 0).as_millis(), 100);
        assert_eq!(compute_delay(&config, 1).as_millis(), 200);
        assert_eq!(compute_delay(&config, 2).as_millis(), 300);
        assert_eq!(compute_delay(&config, 5).as_millis(), 300);
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_secs(30),
            jitter_fraction: 0.25,
        };
        for _ in 0..20 {
            let ms = compute_delay(&config, 0).as_millis();
            assert!((1000..=1250).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn parse_body_with_data_envelope() {
        let body = serde_json::json!({
            "data": { "category": "invoices", "priority": "high", "confidence": 0.9 }
        });
        let result = HttpExtractorBackend::parse_body(body).unwrap();
        assert_eq!(result.category, Category::Finance);
        assert_eq!(result.priority, Priority::High);
    }

    #[test]
    fn parse_body_flat() {
        let body = serde_json::json!({
            "category": "meeting", "priority": "low", "confidence": 0.7
        });
        let result = HttpExtractorBackend::parse_body(body).unwrap();
        assert_eq!(result.category, Category::Meeting);
    }

    #[test]
    fn parse_body_unknown_category_is_permanent() {
        let body = serde_json::json!({
            "category": "starship", "priority": "low", "confidence": 0.7
        });
        let err = HttpExtractorBackend::parse_body(body).unwrap_err();
        assert!(matches!(err, ExternalServiceError::Permanent(_)));
    }
}
