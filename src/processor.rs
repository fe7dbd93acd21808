//! Synchronous ingestion pipeline.
//!
//! One batch run fetches unread mail, extracts text, applies the rule
//! classifier, writes an idempotent baseline record, and enqueues the
//! message for asynchronous enrichment. Every message gets its
//! baseline before anything is queued, so a crash between the two
//! phases loses refinement, never data. Failures are isolated per
//! message: one bad record never sinks its batch siblings.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier;
use crate::enrichment::EnrichmentQueue;
use crate::error::FetchError;
use crate::extract::TextExtractor;
use crate::fetch::MailFetcher;
use crate::model::{BatchItemError, BatchSummary, EmailMessage};
use crate::store::{BaselineFields, CreateOutcome, RecordStore};

/// Per-message outcome fed into the batch summary.
struct ProcessedMessage {
    enqueued: bool,
    degraded: bool,
}

pub struct BatchProcessor {
    fetcher: Arc<dyn MailFetcher>,
    extractor: Arc<dyn TextExtractor>,
    store: Arc<dyn RecordStore>,
    queue: Arc<EnrichmentQueue>,
}

impl BatchProcessor {
    pub fn new(
        fetcher: Arc<dyn MailFetcher>,
        extractor: Arc<dyn TextExtractor>,
        store: Arc<dyn RecordStore>,
        queue: Arc<EnrichmentQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            extractor,
            store,
            queue,
        })
    }

    /// Run one ingestion batch. A fetch failure aborts the whole run;
    /// per-message failures are collected and the rest of the batch
    /// continues.
    pub async fn process_batch(&self) -> Result<BatchSummary, FetchError> {
        let messages = self.fetcher.fetch_batch().await?;
        info!(count = messages.len(), "Processing mail batch");

        let mut summary = BatchSummary::default();
        for message in messages {
            let message_id = message.id.clone();
            match self.process_message(message).await {
                Ok(outcome) => {
                    summary.processed += 1;
                    if outcome.enqueued {
                        summary.enqueued += 1;
                    }
                    if outcome.degraded {
                        summary.degraded += 1;
                    }
                }
                Err(item) => {
                    warn!(
                        message_id = %item.message_id,
                        stage = %item.stage,
                        error = %item.error,
                        "Message failed during ingestion"
                    );
                    summary.errors.push(item);
                    debug!(message_id = %message_id, "Continuing batch after failure");
                }
            }
        }

        info!(
            processed = summary.processed,
            enqueued = summary.enqueued,
            degraded = summary.degraded,
            failed = summary.errors.len(),
            "Batch complete"
        );
        Ok(summary)
    }

    async fn process_message(
        &self,
        message: EmailMessage,
    ) -> Result<ProcessedMessage, BatchItemError> {
        let (text, attachment_texts) = self.extractor.combined_text(&message).await;
        let failed_extractions = attachment_texts.iter().filter(|t| t.extraction_failed).count();
        if failed_extractions > 0 {
            debug!(
                message_id = %message.id,
                failed = failed_extractions,
                "Some attachments yielded no text, classifying from the rest"
            );
        }

        let attachment_names: Vec<String> =
            message.attachments.iter().map(|a| a.name.clone()).collect();
        let classification =
            classifier::classify(message.subject.as_deref(), &message.body, &attachment_names);
        debug!(
            message_id = %message.id,
            category = classification.category.label(),
            priority = classification.priority.label(),
            "Rule classification assigned"
        );

        let outcome = self
            .store
            .create_if_absent(
                &message.id,
                BaselineFields {
                    sender: message.sender.clone(),
                    subject: message.subject.clone(),
                    attachment_names,
                    classification,
                },
            )
            .await
            .map_err(|e| BatchItemError {
                message_id: message.id.clone(),
                stage: "persist".into(),
                error: e.to_string(),
            })?;

        if outcome == CreateOutcome::AlreadyExists {
            debug!(message_id = %message.id, "Baseline row exists, re-offering for enrichment");
        }

        // Enqueue regardless of the create outcome: the queue refuses
        // duplicates of live jobs and never re-queues a Succeeded one,
        // but a previously Failed job gets another delivery here.
        Ok(ProcessedMessage {
            enqueued: self.queue.enqueue(&message.id, text).await,
            degraded: failed_extractions > 0,
        })
    }
}
