//! HTTP surface: liveness, health, and the batch trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::enrichment::{CircuitBreaker, EnrichmentQueue};
use crate::processor::BatchProcessor;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<BatchProcessor>,
    pub queue: Arc<EnrichmentQueue>,
    pub breaker: Arc<CircuitBreaker>,
    pub worker_count: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/mails", get(trigger_batch))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "mail-triage",
        "status": "running",
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.queue.stats().await;
    Json(json!({
        "status": "ok",
        "workers": state.worker_count,
        "queue": stats,
        "extractor_breaker": state.breaker.state().label(),
    }))
}

/// Runs one synchronous ingestion batch and reports what was persisted
/// and enqueued. Enrichment continues in the background after the
/// response is sent.
async fn trigger_batch(State(state): State<AppState>) -> Response {
    match state.processor.process_batch().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            error!(error = %err, "Batch trigger failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
