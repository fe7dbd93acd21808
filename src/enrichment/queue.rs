//! Enrichment job queue: at-least-once, in-process.
//!
//! Jobs are keyed by message id. Delivery is at-least-once: a job may
//! be enqueued again after a failure, and consumers must tolerate
//! redelivery. Two guards keep that safe:
//!
//! - `claim()` only hands out jobs in the Queued state and flips them
//!   to InProgress under the same lock, so no two workers ever hold the
//!   same message id (the per-key in-progress marker).
//! - A job that reached Succeeded is never re-queued, so redelivery can
//!   never cause a second patch.
//!
//! State transitions are monotonic per delivery:
//! Queued → InProgress → {Succeeded | Failed}. A Failed job may be
//! re-enqueued and go around again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Lifecycle state of an enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One enrichment job. The text snapshot is taken at enqueue time so
/// enrichment never re-reads the mailbox.
#[derive(Debug, Clone)]
pub struct EnrichmentJob {
    pub message_id: String,
    pub text: String,
    pub state: JobState,
    /// Number of deliveries that reached InProgress.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueInner {
    /// Message ids awaiting a worker, in enqueue order.
    pending: VecDeque<String>,
    /// Every job ever seen, keyed by message id.
    jobs: HashMap<String, EnrichmentJob>,
}

/// Counts per state, for the health endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The shared queue. The only state shared between the synchronous
/// batch path and the worker pool.
pub struct EnrichmentQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl EnrichmentQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a job for a message, or redeliver an existing one.
    ///
    /// Returns `true` if the job was (re-)queued. A Succeeded job is
    /// never re-queued; an InProgress or already-Queued job is not
    /// double-queued.
    pub async fn enqueue(&self, message_id: impl Into<String>, text: impl Into<String>) -> bool {
        let message_id = message_id.into();
        let mut inner = self.inner.lock().await;

        match inner.jobs.get_mut(&message_id) {
            Some(job) if job.state == JobState::Succeeded => {
                debug!(message_id = %message_id, "Job already succeeded, not re-queuing");
                return false;
            }
            Some(job) if job.state == JobState::Queued || job.state == JobState::InProgress => {
                debug!(
                    message_id = %message_id,
                    state = job.state.label(),
                    "Job already active, not double-queuing"
                );
                return false;
            }
            Some(job) => {
                // Failed: redeliver with a fresh text snapshot.
                job.state = JobState::Queued;
                job.text = text.into();
                job.enqueued_at = Utc::now();
                info!(message_id = %message_id, attempts = job.attempts, "Job re-queued");
            }
            None => {
                inner.jobs.insert(
                    message_id.clone(),
                    EnrichmentJob {
                        message_id: message_id.clone(),
                        text: text.into(),
                        state: JobState::Queued,
                        attempts: 0,
                        last_error: None,
                        enqueued_at: Utc::now(),
                    },
                );
                debug!(message_id = %message_id, "Job enqueued");
            }
        }

        inner.pending.push_back(message_id);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Claim the next Queued job, transitioning it to InProgress.
    ///
    /// Returns a snapshot of the claimed job, or `None` when the queue
    /// is empty. Stale pending entries (ids whose job is no longer
    /// Queued) are skipped.
    pub async fn claim(&self) -> Option<EnrichmentJob> {
        let mut inner = self.inner.lock().await;
        while let Some(message_id) = inner.pending.pop_front() {
            if let Some(job) = inner.jobs.get_mut(&message_id)
                && job.state == JobState::Queued
            {
                job.state = JobState::InProgress;
                job.attempts += 1;
                debug!(
                    message_id = %message_id,
                    attempt = job.attempts,
                    "Job claimed"
                );
                return Some(job.clone());
            }
        }
        None
    }

    /// Wait until a job is likely available. Used by worker loops to
    /// park instead of spinning; spurious wakeups are fine.
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Wake all parked workers (used on shutdown).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Terminal success. Idempotent.
    pub async fn mark_succeeded(&self, message_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(message_id) {
            job.state = JobState::Succeeded;
            job.last_error = None;
            info!(message_id = %message_id, attempts = job.attempts, "Job succeeded");
        }
    }

    /// Terminal failure for this delivery. The baseline record stands.
    pub async fn mark_failed(&self, message_id: &str, error: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(message_id) {
            // Succeeded is sticky; a late failure report cannot demote it.
            if job.state == JobState::Succeeded {
                warn!(message_id = %message_id, "Ignoring failure report for succeeded job");
                return;
            }
            job.state = JobState::Failed;
            job.last_error = Some(error.into());
            warn!(
                message_id = %message_id,
                attempts = job.attempts,
                error = job.last_error.as_deref().unwrap_or(""),
                "Job failed, baseline classification stands"
            );
        }
    }

    /// Current state of a job, if known.
    pub async fn job_state(&self, message_id: &str) -> Option<JobState> {
        self.inner.lock().await.jobs.get(message_id).map(|j| j.state)
    }

    /// Full job snapshot (test/introspection helper).
    pub async fn job(&self, message_id: &str) -> Option<EnrichmentJob> {
        self.inner.lock().await.jobs.get(message_id).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::InProgress => stats.in_progress += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_claim() {
        let queue = EnrichmentQueue::new();
        assert!(queue.enqueue("msg-1", "some text").await);

        let job = queue.claim().await.unwrap();
        assert_eq!(job.message_id, "msg-1");
        assert_eq!(job.state, JobState::InProgress);
        assert_eq!(job.attempts, 1);

        // Nothing left to claim.
        assert!(queue.claim().await.is_none());
    }

    #[tokio::test]
    async fn claim_order_is_fifo() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("a", "").await;
        queue.enqueue("b", "").await;
        assert_eq!(queue.claim().await.unwrap().message_id, "a");
        assert_eq!(queue.claim().await.unwrap().message_id, "b");
    }

    #[tokio::test]
    async fn double_enqueue_while_queued_is_noop() {
        let queue = EnrichmentQueue::new();
        assert!(queue.enqueue("msg-1", "text").await);
        assert!(!queue.enqueue("msg-1", "text").await);

        queue.claim().await.unwrap();
        // Only one pending entry existed.
        assert!(queue.claim().await.is_none());
    }

    #[tokio::test]
    async fn in_progress_job_cannot_be_claimed_twice() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("msg-1", "text").await;
        queue.claim().await.unwrap();

        // Redelivery attempt while in progress does not queue a duplicate.
        assert!(!queue.enqueue("msg-1", "text").await);
        assert!(queue.claim().await.is_none());
    }

    #[tokio::test]
    async fn succeeded_job_never_requeued() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("msg-1", "text").await;
        queue.claim().await.unwrap();
        queue.mark_succeeded("msg-1").await;

        assert!(!queue.enqueue("msg-1", "text").await);
        assert!(queue.claim().await.is_none());
        assert_eq!(queue.job_state("msg-1").await, Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn failed_job_can_be_redelivered() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("msg-1", "text").await;
        queue.claim().await.unwrap();
        queue.mark_failed("msg-1", "extractor down").await;

        assert_eq!(queue.job_state("msg-1").await, Some(JobState::Failed));
        assert!(queue.enqueue("msg-1", "text v2").await);

        let job = queue.claim().await.unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.text, "text v2");
    }

    #[tokio::test]
    async fn late_failure_cannot_demote_success() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("msg-1", "text").await;
        queue.claim().await.unwrap();
        queue.mark_succeeded("msg-1").await;
        queue.mark_failed("msg-1", "late report").await;
        assert_eq!(queue.job_state("msg-1").await, Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn stats_count_states() {
        let queue = EnrichmentQueue::new();
        queue.enqueue("a", "").await;
        queue.enqueue("b", "").await;
        queue.enqueue("c", "").await;
        queue.claim().await.unwrap();
        let b = queue.claim().await.unwrap();
        queue.mark_succeeded(&b.message_id).await;

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn notify_wakes_waiter() {
        let queue = EnrichmentQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.wait_for_work().await;
                queue.claim().await
            })
        };
        // Give the waiter a chance to park first.
        tokio::task::yield_now().await;
        queue.enqueue("msg-1", "text").await;

        let claimed = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(claimed.is_some());
    }
}
