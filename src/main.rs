use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mail_triage::config::AppConfig;
use mail_triage::error::ConfigError;
use mail_triage::enrichment::{
    CircuitBreaker, EnrichmentQueue, ExtractorClient, HttpExtractorBackend, WorkerPool,
};
use mail_triage::extract::BasicTextExtractor;
use mail_triage::fetch::{ClientCredentialsProvider, HttpMailFetcher, StaticTokenProvider, TokenProvider};
use mail_triage::http::{router, AppState};
use mail_triage::processor::BatchProcessor;
use mail_triage::store::{HttpRecordStore, MemoryRecordStore, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    if config.mail_api_url.is_empty() {
        return Err(ConfigError::MissingEnvVar("MAIL_API_URL".into()).into());
    }
    if config.extractor.base_url.is_empty() {
        return Err(ConfigError::MissingEnvVar("EXTRACTOR_URL".into()).into());
    }

    let http = reqwest::Client::builder()
        .timeout(config.extractor.request_timeout)
        .build()
        .context("building HTTP client")?;

    let tokens: Arc<dyn TokenProvider> = match config.token.clone() {
        Some(token_config) => Arc::new(ClientCredentialsProvider::new(token_config, http.clone())),
        None => Arc::new(StaticTokenProvider::new("")),
    };

    let fetcher = Arc::new(HttpMailFetcher::new(
        config.mail_api_url.clone(),
        config.mailbox.clone(),
        http.clone(),
        Arc::clone(&tokens),
    ));

    let store: Arc<dyn RecordStore> = if config.store_url.is_empty() {
        info!("No store URL configured, using in-memory record store");
        Arc::new(MemoryRecordStore::new())
    } else {
        Arc::new(HttpRecordStore::new(
            config.store_url.clone(),
            config.store_table.clone(),
            http.clone(),
            Arc::clone(&tokens),
        ))
    };

    let breaker = Arc::new(CircuitBreaker::new(&config.extractor.breaker));
    let client = Arc::new(ExtractorClient::new(
        HttpExtractorBackend::new(&config.extractor, http.clone()),
        config.extractor.request_timeout,
        config.extractor.retry.clone(),
        Arc::clone(&breaker),
    ));

    let queue = EnrichmentQueue::new();
    let pool = WorkerPool::spawn(
        config.worker_count,
        Arc::clone(&queue),
        client,
        Arc::clone(&store),
    );

    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store,
        Arc::clone(&queue),
    );

    let state = AppState {
        processor,
        queue,
        breaker,
        worker_count: pool.worker_count(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, workers = pool.worker_count(), "Mail triage service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    pool.shutdown().await;
    Ok(())
}
