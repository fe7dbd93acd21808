//! End-to-end pipeline tests: fetch, classify, persist, enqueue, then
//! asynchronous enrichment against a mock extractor, all in-process on
//! the in-memory record store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mail_triage::config::{BreakerConfig, RetryConfig};
use mail_triage::enrichment::{
    BreakerState, CircuitBreaker, EnrichmentQueue, ExtractorBackend, ExtractorClient, JobState,
    WorkerPool,
};
use mail_triage::error::{ExternalServiceError, FetchError};
use mail_triage::extract::BasicTextExtractor;
use mail_triage::fetch::MailFetcher;
use mail_triage::model::{
    Attachment, Category, ClassificationResult, ClassificationSource, EmailMessage, Priority,
};
use mail_triage::processor::BatchProcessor;
use mail_triage::store::MemoryRecordStore;

struct ScriptedFetcher {
    batches: Mutex<Vec<Vec<EmailMessage>>>,
}

impl ScriptedFetcher {
    fn new(mut batches: Vec<Vec<EmailMessage>>) -> Arc<Self> {
        batches.reverse();
        Arc::new(Self {
            batches: Mutex::new(batches),
        })
    }
}

#[async_trait]
impl MailFetcher for ScriptedFetcher {
    async fn fetch_batch(&self) -> Result<Vec<EmailMessage>, FetchError> {
        Ok(self.batches.lock().unwrap().pop().unwrap_or_default())
    }
}

/// Mock extractor: fails `failures_before_success` calls with a
/// transient error, then returns a fixed refined classification.
struct MockExtractor {
    calls: AtomicU32,
    failures_before_success: u32,
    result: ClassificationResult,
}

#[async_trait]
impl ExtractorBackend for MockExtractor {
    async fn classify(&self, _text: &str) -> Result<ClassificationResult, ExternalServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(ExternalServiceError::Transient("503 from extractor".into()));
        }
        Ok(self.result.clone())
    }
}

fn message(id: &str, subject: &str, body: &str) -> EmailMessage {
    EmailMessage {
        id: id.into(),
        sender: "accounts@example.com".into(),
        subject: Some(subject.into()),
        body: body.into(),
        attachments: vec![],
        received_at: Utc::now(),
    }
}

fn refined(category: Category, priority: Priority) -> ClassificationResult {
    ClassificationResult::new(category, priority, 0.95, ClassificationSource::External)
}

fn fast_client(
    backend: MockExtractor,
    breaker: Arc<CircuitBreaker>,
) -> Arc<ExtractorClient<MockExtractor>> {
    Arc::new(ExtractorClient::new(
        backend,
        Duration::from_millis(200),
        RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            jitter_fraction: 0.0,
        },
        breaker,
    ))
}

fn wide_breaker() -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(&BreakerConfig {
        failure_threshold: 100,
        cooldown: Duration::from_secs(60),
    }))
}

async fn settle(queue: &EnrichmentQueue, id: &str) -> JobState {
    for _ in 0..400 {
        if let Some(state) = queue.job_state(id).await {
            if state.is_terminal() {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never settled");
}

#[tokio::test]
async fn two_phase_flow_persists_baseline_then_patches() {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = EnrichmentQueue::new();
    let breaker = wide_breaker();

    let client = fast_client(
        MockExtractor {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            result: refined(Category::Finance, Priority::Critical),
        },
        Arc::clone(&breaker),
    );
    let pool = WorkerPool::spawn(2, Arc::clone(&queue), client, store.clone());

    let fetcher = ScriptedFetcher::new(vec![vec![message(
        "msg-1",
        "Invoice #4521 due",
        "Please settle the attached invoice.",
    )]]);
    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store.clone(),
        Arc::clone(&queue),
    );

    let summary = processor.process_batch().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.enqueued, 1);

    // Baseline is written synchronously with the rule classification.
    let record = store.get("msg-1").await.unwrap();
    assert_eq!(record.classification.category, Category::Finance);
    assert_eq!(record.classification.priority, Priority::High);
    assert_eq!(record.classification.source, ClassificationSource::Rule);

    // Enrichment lands asynchronously and patches the same record.
    assert_eq!(settle(&queue, "msg-1").await, JobState::Succeeded);
    let record = store.get("msg-1").await.unwrap();
    assert_eq!(record.classification.priority, Priority::Critical);
    assert_eq!(record.classification.source, ClassificationSource::External);
    assert!(record.patched_at.is_some());

    pool.shutdown().await;
}

#[tokio::test]
async fn transient_extractor_failure_recovers_within_retry_budget() {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = EnrichmentQueue::new();
    let client = fast_client(
        MockExtractor {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
            result: refined(Category::CustomerRequest, Priority::Medium),
        },
        wide_breaker(),
    );
    let pool = WorkerPool::spawn(1, Arc::clone(&queue), client, store.clone());

    let fetcher = ScriptedFetcher::new(vec![vec![message(
        "msg-2",
        "Customer enquiry",
        "A client asked about pricing.",
    )]]);
    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store.clone(),
        Arc::clone(&queue),
    );
    processor.process_batch().await.unwrap();

    assert_eq!(settle(&queue, "msg-2").await, JobState::Succeeded);
    let record = store.get("msg-2").await.unwrap();
    assert_eq!(record.classification.source, ClassificationSource::External);
    pool.shutdown().await;
}

#[tokio::test]
async fn extractor_outage_keeps_baseline_and_opens_breaker() {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = EnrichmentQueue::new();
    let breaker = Arc::new(CircuitBreaker::new(&BreakerConfig {
        failure_threshold: 3,
        cooldown: Duration::from_secs(60),
    }));
    let client = fast_client(
        MockExtractor {
            calls: AtomicU32::new(0),
            failures_before_success: u32::MAX,
            result: refined(Category::General, Priority::Low),
        },
        Arc::clone(&breaker),
    );
    let pool = WorkerPool::spawn(1, Arc::clone(&queue), client, store.clone());

    let fetcher = ScriptedFetcher::new(vec![vec![
        message("out-1", "Support ticket", "The portal throws an error."),
        message("out-2", "Another issue", "Still broken."),
    ]]);
    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store.clone(),
        Arc::clone(&queue),
    );
    processor.process_batch().await.unwrap();

    assert_eq!(settle(&queue, "out-1").await, JobState::Failed);
    assert_eq!(settle(&queue, "out-2").await, JobState::Failed);
    assert_eq!(breaker.state(), BreakerState::Open);

    // Baselines survive the outage untouched.
    for id in ["out-1", "out-2"] {
        let record = store.get(id).await.unwrap();
        assert_eq!(record.classification.source, ClassificationSource::Rule);
        assert_eq!(record.classification.category, Category::ServiceRequest);
        assert!(record.patched_at.is_none());
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn duplicate_delivery_neither_duplicates_rows_nor_patches_twice() {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = EnrichmentQueue::new();
    let client = fast_client(
        MockExtractor {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            result: refined(Category::Meeting, Priority::Low),
        },
        wide_breaker(),
    );
    let pool = WorkerPool::spawn(1, Arc::clone(&queue), client, store.clone());

    let batch = vec![message("dup-1", "Meeting invite", "Calendar hold for Friday.")];
    let fetcher = ScriptedFetcher::new(vec![batch.clone(), batch]);
    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store.clone(),
        Arc::clone(&queue),
    );

    processor.process_batch().await.unwrap();
    assert_eq!(settle(&queue, "dup-1").await, JobState::Succeeded);
    let first_patch = store.get("dup-1").await.unwrap().patched_at;

    // Same message arrives again in a later batch.
    let summary = processor.process_batch().await.unwrap();
    assert_eq!(summary.enqueued, 0);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.len().await, 1);
    assert_eq!(store.get("dup-1").await.unwrap().patched_at, first_patch);
    assert_eq!(queue.stats().await.succeeded, 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn attachment_names_feed_the_rule_classifier() {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = EnrichmentQueue::new();

    let mut msg = message("att-1", "Documents attached", "See attached.");
    msg.attachments.push(Attachment {
        id: "a1".into(),
        name: "statement-march.pdf".into(),
        content_type: "application/pdf".into(),
        data: vec![0x25, 0x50, 0x44, 0x46],
    });

    let fetcher = ScriptedFetcher::new(vec![vec![msg]]);
    let processor = BatchProcessor::new(
        fetcher,
        Arc::new(BasicTextExtractor::new()),
        store.clone(),
        Arc::clone(&queue),
    );
    processor.process_batch().await.unwrap();

    let record = store.get("att-1").await.unwrap();
    assert_eq!(record.classification.category, Category::Finance);
}
