//! Circuit breaker for the extractor service.
//!
//! Shared process-wide across every extractor caller: one failing
//! dependency trips one breaker, and while it is open no caller issues
//! network calls against it. Construct the breaker once and hand an
//! `Arc` to each client.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::ExternalServiceError;

/// Breaker state, as reported by [`CircuitBreaker::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; failures are being counted.
    Closed,
    /// Failing fast; no calls go out until the cooldown elapses.
    Open,
    /// One trial request is in flight; its outcome decides the next state.
    HalfOpen,
}

impl BreakerState {
    pub fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a call attempt. `Ok` admits the call; `Err(CircuitOpen)`
    /// rejects it without touching the network. An open breaker whose
    /// cooldown has elapsed transitions to half-open and admits exactly
    /// one trial; further attempts are rejected until the trial reports
    /// back.
    pub fn check(&self) -> Result<(), ExternalServiceError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(ExternalServiceError::CircuitOpen),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    info!("Circuit breaker half-open, admitting trial request");
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(ExternalServiceError::CircuitOpen)
                }
            }
        }
    }

    /// Record a successful call. Closes the breaker and resets counters.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != BreakerState::Closed {
            info!("Circuit breaker closed after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call. A half-open trial failure re-opens
    /// immediately; in closed state the breaker opens once the
    /// consecutive-failure threshold is reached.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("Circuit breaker trial failed, re-opening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    failures = inner.consecutive_failures,
                    threshold = self.failure_threshold,
                    "Extractor failure recorded"
                );
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            // Late failure report while already open; nothing to update.
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}
