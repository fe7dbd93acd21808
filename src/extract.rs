//! Attachment text extraction.
//!
//! The extraction algorithms themselves (PDF text layers, OCR) live in
//! an external service; this module defines the seam and a best-effort
//! local implementation for text-like attachments. Extraction never
//! fails a message: unsupported or corrupt input degrades to an empty
//! [`AttachmentText`] with `extraction_failed` set.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::model::{Attachment, AttachmentText, EmailMessage};

/// Converts a message's body and attachments into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from a single attachment. Must not error; failures
    /// are reported through the `extraction_failed` flag.
    async fn extract_attachment(&self, attachment: &Attachment) -> AttachmentText;

    /// Build the single text blob sent to the classifiers:
    /// subject, body, then attachment texts in order.
    async fn combined_text(&self, message: &EmailMessage) -> (String, Vec<AttachmentText>) {
        let mut texts = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            texts.push(self.extract_attachment(attachment).await);
        }

        let mut parts = Vec::new();
        if let Some(subject) = message.subject.as_deref()
            && !subject.trim().is_empty()
        {
            parts.push(format!("Subject: {}", subject.trim()));
        }
        if !message.body.trim().is_empty() {
            parts.push(message.body.trim().to_string());
        }
        let attachment_blob: String = texts
            .iter()
            .filter(|t| !t.text.is_empty())
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !attachment_blob.is_empty() {
            parts.push(format!("--- Attachment text ---\n{attachment_blob}"));
        }

        (parts.join("\n\n"), texts)
    }
}

/// Local extractor for text-like content types.
///
/// Handles `text/plain` (and csv/markdown), strips tags from
/// `text/html`, and flags everything else as failed. OCR is the
/// external extractor's job; `used_ocr` stays false here.
pub struct BasicTextExtractor;

impl BasicTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BasicTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for BasicTextExtractor {
    async fn extract_attachment(&self, attachment: &Attachment) -> AttachmentText {
        let content_type = attachment
            .content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        let corrupt = |e: std::string::FromUtf8Error| ExtractionError::Corrupt {
            attachment_id: attachment.id.clone(),
            reason: e.to_string(),
        };
        let decoded = match content_type.as_str() {
            "text/plain" | "text/csv" | "text/markdown" => {
                String::from_utf8(attachment.data.clone()).map_err(corrupt)
            }
            "text/html" => String::from_utf8(attachment.data.clone())
                .map(|html| mail_parser::decoders::html::html_to_text(&html))
                .map_err(corrupt),
            other => Err(ExtractionError::UnsupportedContentType(other.to_string())),
        };

        match decoded {
            Ok(text) => {
                debug!(
                    attachment_id = %attachment.id,
                    name = %attachment.name,
                    chars = text.len(),
                    "Extracted attachment text"
                );
                AttachmentText {
                    attachment_id: attachment.id.clone(),
                    text,
                    used_ocr: false,
                    extraction_failed: false,
                }
            }
            Err(reason) => {
                warn!(
                    attachment_id = %attachment.id,
                    name = %attachment.name,
                    reason = %reason,
                    "Attachment extraction failed, degrading to empty text"
                );
                AttachmentText {
                    attachment_id: attachment.id.clone(),
                    text: String::new(),
                    used_ocr: false,
                    extraction_failed: true,
                }
            }
        }
    }
}
