//! Enrichment worker pool.
//!
//! A fixed set of tokio tasks drain the [`EnrichmentQueue`]: each
//! worker claims a job, runs the text through the resilient extractor
//! client, and patches the stored record with the refined
//! classification. A job that fails (retries exhausted, breaker open,
//! permanent error, or patch failure) is marked failed and left for a
//! later delivery; the baseline record written during ingestion is
//! never touched on failure.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::enrichment::client::{ExtractorBackend, ExtractorClient};
use crate::enrichment::queue::{EnrichmentJob, EnrichmentQueue};
use crate::store::RecordStore;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    queue: Arc<EnrichmentQueue>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers draining `queue`.
    pub fn spawn<B: ExtractorBackend + 'static>(
        worker_count: usize,
        queue: Arc<EnrichmentQueue>,
        client: Arc<ExtractorClient<B>>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let worker_count = worker_count.max(1);

        let handles = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let client = Arc::clone(&client);
                let store = Arc::clone(&store);
                let mut shutdown_rx = shutdown.subscribe();

                tokio::spawn(async move {
                    info!(worker_id, "Enrichment worker started");
                    loop {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        match queue.claim().await {
                            Some(job) => run_job(&queue, &client, &store, job).await,
                            None => {
                                tokio::select! {
                                    _ = queue.wait_for_work() => {}
                                    _ = shutdown_rx.changed() => {}
                                }
                            }
                        }
                    }
                    debug!(worker_id, "Enrichment worker stopped");
                })
            })
            .collect();

        Self {
            handles,
            shutdown,
            queue,
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Signal all workers and wait for them to drain their current job.
    /// Unclaimed jobs stay queued for the next run.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.queue.wake_all();
        join_all(self.handles).await;
        info!("Enrichment worker pool stopped");
    }
}

async fn run_job<B: ExtractorBackend>(
    queue: &EnrichmentQueue,
    client: &ExtractorClient<B>,
    store: &Arc<dyn RecordStore>,
    job: EnrichmentJob,
) {
    let message_id = job.message_id;
    debug!(message_id = %message_id, attempt = job.attempts, "Enriching message");

    let result = match client.classify_external(&job.text).await {
        Ok(result) => result,
        Err(err) => {
            warn!(message_id = %message_id, error = %err, "Enrichment classification failed");
            queue.mark_failed(&message_id, err.to_string()).await;
            return;
        }
    };

    match store.patch_classification(&message_id, &result).await {
        Ok(()) => {
            info!(
                message_id = %message_id,
                category = result.category.label(),
                priority = result.priority.label(),
                "Record enriched"
            );
            queue.mark_succeeded(&message_id).await;
        }
        Err(err) => {
            error!(message_id = %message_id, error = %err, "Failed to patch enriched record");
            queue.mark_failed(&message_id, err.to_string()).await;
        }
    }
}
