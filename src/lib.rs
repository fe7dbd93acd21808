//! Mail triage service.
//!
//! Ingests unread mail, classifies each message with keyword rules,
//! persists an idempotent baseline record, and hands the message text
//! to a pool of enrichment workers that call an external extractor
//! service for a refined classification. Ingestion is synchronous and
//! loss-free; enrichment is asynchronous and best-effort.

pub mod classifier;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod http;
pub mod model;
pub mod processor;
pub mod store;

pub use error::{Error, Result};
