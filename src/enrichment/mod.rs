//! Asynchronous enrichment: queue, circuit breaker, resilient
//! extractor client, and the worker pool that ties them together.

pub mod breaker;
pub mod client;
pub mod queue;
pub mod worker;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{ExtractorBackend, ExtractorClient, HttpExtractorBackend};
pub use queue::{EnrichmentQueue, JobState, QueueStats};
pub use worker::WorkerPool;
