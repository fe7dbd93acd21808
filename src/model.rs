//! Shared types for the ingestion and enrichment pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Inbound mail ────────────────────────────────────────────────────

/// A fetched mailbox message. Immutable once fetched; `id` is the
/// channel-native message identifier and is stable across refetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    /// Plain-text body (may be empty when only HTML was available).
    pub body: String,
    /// Ordered as delivered by the mailbox.
    pub attachments: Vec<Attachment>,
    pub received_at: DateTime<Utc>,
}

/// A raw attachment as delivered by the mailbox transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub content_type: String,
    #[serde(with = "serde_bytes_b64")]
    pub data: Vec<u8>,
}

/// Text extracted from one attachment. Extraction failure is recorded,
/// never propagated; the message still classifies on subject/body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentText {
    pub attachment_id: String,
    pub text: String,
    pub used_ocr: bool,
    pub extraction_failed: bool,
}

// ── Classification ──────────────────────────────────────────────────

/// Closed category set. The external extractor reports free-form labels
/// which are normalized through [`Category::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Finance,
    ServiceRequest,
    TeamRequest,
    CustomerRequest,
    Meeting,
    Timesheet,
    General,
}

impl Category {
    /// Lenient parse of labels seen from the external service
    /// ("invoice"/"invoices" and friends). Unknown labels yield `None`;
    /// the caller decides whether that is a protocol error.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "finance" | "invoice" | "invoices" | "billing" => Some(Self::Finance),
            "service_request" | "service request" | "support" => Some(Self::ServiceRequest),
            "team_request" | "team request" | "team member request" | "access_request" => {
                Some(Self::TeamRequest)
            }
            "customer_request" | "customer request" | "customer requests" | "enquiry"
            | "inquiry" => Some(Self::CustomerRequest),
            "meeting" | "calendar" => Some(Self::Meeting),
            "timesheet" | "timesheets" => Some(Self::Timesheet),
            "general" | "misc" | "miscellaneous" | "other" => Some(Self::General),
            _ => None,
        }
    }

    /// Canonical snake_case label, matching the serde representation.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::ServiceRequest => "service_request",
            Self::TeamRequest => "team_request",
            Self::CustomerRequest => "customer_request",
            Self::Meeting => "meeting",
            Self::Timesheet => "timesheet",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Which classifier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Rule,
    External,
}

/// A classification: the baseline (rule) or the enriched (external) one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub priority: Priority,
    /// Clamped to 0.0–1.0 on construction.
    pub confidence: f32,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    pub fn new(
        category: Category,
        priority: Priority,
        confidence: f32,
        source: ClassificationSource,
    ) -> Self {
        Self {
            category,
            priority,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }
}

// ── Batch summary ───────────────────────────────────────────────────

/// One message that failed during batch processing. The batch itself
/// keeps going; these are surfaced in the trigger response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub message_id: String,
    pub stage: String,
    pub error: String,
}

/// Response body of the `/mails` trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub enqueued: usize,
    /// Messages where at least one attachment yielded no text; they were
    /// classified from whatever remained.
    pub degraded: usize,
    pub errors: Vec<BatchItemError>,
}

// ── serde helper ────────────────────────────────────────────────────

/// Attachment bytes travel base64-encoded in JSON, mirroring how the
/// mailbox API delivers `contentBytes`.
mod serde_bytes_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
