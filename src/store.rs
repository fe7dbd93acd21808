//! Record store: baseline create and enrichment patch.
//!
//! The store owns the persisted representation; the pipeline only sees
//! the [`RecordStore`] trait. The visible guarantee is "at most one
//! baseline row per message identifier": `create_if_absent` is safe to
//! call repeatedly with the same id, and `patch_classification` is
//! keyed by that same id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::fetch::TokenProvider;
use crate::model::{ClassificationResult, ClassificationSource};

/// Fields written at baseline creation (Phase 1).
#[derive(Debug, Clone)]
pub struct BaselineFields {
    pub sender: String,
    pub subject: Option<String>,
    pub attachment_names: Vec<String>,
    pub classification: ClassificationResult,
}

/// Outcome of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Create/patch operations against the tabular store, keyed by message id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the baseline row unless one already exists for this
    /// message id. Never creates a duplicate.
    async fn create_if_absent(
        &self,
        message_id: &str,
        fields: BaselineFields,
    ) -> Result<CreateOutcome, PersistenceError>;

    /// Partial update limited to the classification fields, keyed by
    /// the message id used at creation.
    async fn patch_classification(
        &self,
        message_id: &str,
        classification: &ClassificationResult,
    ) -> Result<(), PersistenceError>;
}

// ── In-memory store ─────────────────────────────────────────────────

/// A stored row, as the in-memory backend keeps it.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub message_id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub attachment_names: Vec<String>,
    pub classification: ClassificationResult,
    pub created_at: DateTime<Utc>,
    pub patched_at: Option<DateTime<Utc>>,
}

/// In-process store used by tests and when no store URL is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a row (test/introspection helper).
    pub async fn get(&self, message_id: &str) -> Option<StoredRecord> {
        self.rows.read().await.get(message_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_if_absent(
        &self,
        message_id: &str,
        fields: BaselineFields,
    ) -> Result<CreateOutcome, PersistenceError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(message_id) {
            debug!(message_id = %message_id, "Baseline row exists, skipping create");
            return Ok(CreateOutcome::AlreadyExists);
        }
        rows.insert(
            message_id.to_string(),
            StoredRecord {
                message_id: message_id.to_string(),
                sender: fields.sender,
                subject: fields.subject,
                attachment_names: fields.attachment_names,
                classification: fields.classification,
                created_at: Utc::now(),
                patched_at: None,
            },
        );
        info!(message_id = %message_id, "Baseline row created");
        Ok(CreateOutcome::Created)
    }

    async fn patch_classification(
        &self,
        message_id: &str,
        classification: &ClassificationResult,
    ) -> Result<(), PersistenceError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(message_id)
            .ok_or_else(|| PersistenceError::WriteRejected {
                message_id: message_id.to_string(),
                reason: "no baseline row to patch".into(),
            })?;
        row.classification = *classification;
        row.patched_at = Some(Utc::now());
        info!(
            message_id = %message_id,
            category = classification.category.label(),
            priority = classification.priority.label(),
            "Record patched with enrichment"
        );
        Ok(())
    }
}

// ── HTTP store ──────────────────────────────────────────────────────

/// OData-style tabular store client: lookup by key column, POST to
/// create, PATCH by row id.
pub struct HttpRecordStore {
    base_url: String,
    table: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

/// Key column holding the mailbox message id.
const KEY_COLUMN: &str = "message_id";

#[derive(serde::Deserialize)]
struct LookupResponse {
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

impl HttpRecordStore {
    pub fn new(
        base_url: impl Into<String>,
        table: impl Into<String>,
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            table: table.into(),
            http,
            tokens,
        }
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    async fn bearer(&self) -> Result<String, PersistenceError> {
        let token = self
            .tokens
            .acquire()
            .await
            .map_err(|e| PersistenceError::AuthFailed(e.to_string()))?;
        Ok(token.secret.expose_secret().to_string())
    }

    /// Row GUID for the given message id, if a row exists.
    async fn find_row_id(&self, message_id: &str) -> Result<Option<String>, PersistenceError> {
        let bearer = self.bearer().await?;
        let url = format!(
            "{}?$select=row_id&$filter={KEY_COLUMN} eq '{}'",
            self.table_url(),
            message_id.replace('\'', "''")
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PersistenceError::InvalidResponse(format!(
                "lookup returned {status}"
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| PersistenceError::InvalidResponse(e.to_string()))?;
        Ok(body
            .value
            .first()
            .and_then(|row| row.get("row_id"))
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    fn classification_fields(classification: &ClassificationResult) -> serde_json::Value {
        json!({
            "category": classification.category.label(),
            "priority": classification.priority.label(),
            "confidence": classification.confidence,
            "source": match classification.source {
                ClassificationSource::Rule => "rule",
                ClassificationSource::External => "external",
            },
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create_if_absent(
        &self,
        message_id: &str,
        fields: BaselineFields,
    ) -> Result<CreateOutcome, PersistenceError> {
        // Pre-check then create; the store has no upsert-by-key.
        if self.find_row_id(message_id).await?.is_some() {
            debug!(message_id = %message_id, "Baseline row exists, skipping create");
            return Ok(CreateOutcome::AlreadyExists);
        }

        let mut payload = Self::classification_fields(&fields.classification);
        payload[KEY_COLUMN] = json!(message_id);
        payload["sender"] = json!(fields.sender);
        payload["subject"] = json!(fields.subject.unwrap_or_default());
        payload["attachments"] = json!(fields.attachment_names.join(", "));

        let bearer = self.bearer().await?;
        let response = self
            .http
            .post(self.table_url())
            .bearer_auth(&bearer)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PersistenceError::WriteRejected {
                message_id: message_id.to_string(),
                reason: format!("create returned {status}: {body}"),
            });
        }

        info!(message_id = %message_id, table = %self.table, "Baseline row created");
        Ok(CreateOutcome::Created)
    }

    async fn patch_classification(
        &self,
        message_id: &str,
        classification: &ClassificationResult,
    ) -> Result<(), PersistenceError> {
        let row_id = self.find_row_id(message_id).await?.ok_or_else(|| {
            PersistenceError::WriteRejected {
                message_id: message_id.to_string(),
                reason: "no baseline row to patch".into(),
            }
        })?;

        let payload = Self::classification_fields(classification);
        let bearer = self.bearer().await?;
        let url = format!("{}({row_id})", self.table_url());
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&bearer)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PersistenceError::WriteRejected {
                message_id: message_id.to_string(),
                reason: format!("patch returned {status}: {body}"),
            });
        }

        info!(
            message_id = %message_id,
            category = classification.category.label(),
            "Record patched with enrichment"
        );
        Ok(())
    }
}
