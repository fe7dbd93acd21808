//! Keyword/metadata baseline classifier.
//!
//! Runs synchronously on every fetched message and doubles as the
//! permanent fallback when enrichment is unavailable. Pure and
//! deterministic: no I/O, no shared state, identical inputs always
//! produce the identical result. Unmatched input yields General/Low
//! with low confidence rather than an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Category, ClassificationResult, ClassificationSource, Priority};

/// Confidence assigned when a category keyword matched.
const MATCHED_CONFIDENCE: f32 = 0.6;

/// Confidence of the default General bucket.
const DEFAULT_CONFIDENCE: f32 = 0.25;

/// A category with its keyword pattern, checked in declaration order.
struct CategoryRule {
    category: Category,
    pattern: &'static Regex,
}

macro_rules! keyword_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new($pattern).expect("keyword pattern must compile")
        });
    };
}

keyword_regex!(FINANCE, r"(?i)\b(invoice|bill|statement|remittance)\b");
keyword_regex!(SERVICE, r"(?i)\b(issue|support|ticket|incident)\b");
keyword_regex!(TEAM, r"(?i)\b(access|permission|onboarding)\b|\brequest(ing)? access\b");
keyword_regex!(CUSTOMER, r"(?i)\b(client|customer|enquiry|inquiry)\b");
keyword_regex!(MEETING, r"(?i)\b(meeting|calendar|invite|reschedul\w*)\b");
keyword_regex!(TIMESHEET, r"(?i)\b(timesheet|work hours|hours approval)\b");

keyword_regex!(URGENCY, r"(?i)\b(urgent|asap|immediate(ly)?|important|high priority)\b");
keyword_regex!(INCIDENT, r"(?i)\b(critical|outage|emergency|production down)\b");
keyword_regex!(PAYMENT_DUE, r"(?i)\b(due|overdue|past due|final notice)\b");

fn category_rules() -> [CategoryRule; 6] {
    [
        CategoryRule {
            category: Category::Finance,
            pattern: &FINANCE,
        },
        CategoryRule {
            category: Category::ServiceRequest,
            pattern: &SERVICE,
        },
        CategoryRule {
            category: Category::TeamRequest,
            pattern: &TEAM,
        },
        CategoryRule {
            category: Category::CustomerRequest,
            pattern: &CUSTOMER,
        },
        CategoryRule {
            category: Category::Meeting,
            pattern: &MEETING,
        },
        CategoryRule {
            category: Category::Timesheet,
            pattern: &TIMESHEET,
        },
    ]
}

/// Classify a message from its subject, body text, and attachment names.
///
/// Subject, body and attachment names are matched as one blob, so a keyword
/// anywhere counts. First matching category in table order wins, so a
/// message mentioning both an invoice and a meeting lands in Finance.
pub fn classify(
    subject: Option<&str>,
    body: &str,
    attachment_names: &[String],
) -> ClassificationResult {
    let text = format!(
        "{} {} {}",
        subject.unwrap_or(""),
        body,
        attachment_names.join(" ")
    );

    let category = category_rules()
        .iter()
        .find(|rule| rule.pattern.is_match(&text))
        .map(|rule| rule.category);

    let mut priority = if INCIDENT.is_match(&text) {
        Priority::Critical
    } else if URGENCY.is_match(&text) {
        Priority::High
    } else {
        Priority::Low
    };

    // Finance mail with a payment deadline is actionable even without
    // explicit urgency words.
    if category == Some(Category::Finance)
        && priority < Priority::High
        && PAYMENT_DUE.is_match(&text)
    {
        priority = Priority::High;
    }

    match category {
        Some(category) => ClassificationResult::new(
            category,
            priority,
            MATCHED_CONFIDENCE,
            ClassificationSource::Rule,
        ),
        None => ClassificationResult::new(
            Category::General,
            priority,
            DEFAULT_CONFIDENCE,
            ClassificationSource::Rule,
        ),
    }
}
