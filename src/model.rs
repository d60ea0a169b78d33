//! Core domain types shared by the store, classifier, worker and view

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::classifier::MessageAnalysis;

/// Classification outcome for a mail message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Schedule,
    Task,
    Spam,
    Uncertain,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Schedule => "SCHEDULE",
            Category::Task => "TASK",
            Category::Spam => "SPAM",
            Category::Uncertain => "UNCERTAIN",
        }
    }

    /// Map a free-form model label onto the closed set.
    ///
    /// Anything that is not one of the known labels becomes `Uncertain`.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Category::Uncertain)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCHEDULE" => Ok(Category::Schedule),
            "TASK" => Ok(Category::Task),
            "SPAM" => Ok(Category::Spam),
            "UNCERTAIN" => Ok(Category::Uncertain),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Source feed identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedId {
    Mail,
    Calendar,
    Tasks,
}

impl FeedId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedId::Mail => "mail",
            FeedId::Calendar => "calendar",
            FeedId::Tasks => "tasks",
        }
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable per-message key: `{feed}:{source id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint from the feed's own message identifier
    pub fn from_source(feed: FeedId, source_id: &str) -> Self {
        Self(format!("{}:{}", feed.as_str(), source_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque ingestion position for a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One item pulled from a source feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Subject line for mail, title for calendar/task items
    #[serde(default, alias = "subject")]
    pub summary: String,
    #[serde(default, alias = "body")]
    pub content: String,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Result of `list_new_items`
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub items: Vec<FeedItem>,
    /// `None` means the feed has nothing new to record
    pub next_cursor: Option<Cursor>,
}

/// Classifier output after policy has been applied
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub category: Category,
    pub confidence: f64,
    pub rationale: Option<String>,
}

impl Verdict {
    pub const UNAVAILABLE_RATIONALE: &'static str = "classification unavailable";

    pub fn unavailable() -> Self {
        Self {
            category: Category::Uncertain,
            confidence: 0.0,
            rationale: Some(Self::UNAVAILABLE_RATIONALE.to_string()),
        }
    }
}

/// Persisted classification of one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRecord {
    pub fingerprint: Fingerprint,
    pub category: Category,
    pub confidence: f64,
    pub rationale: Option<String>,
    pub summary: String,
    pub received_at: DateTime<Utc>,
    pub classified_at: DateTime<Utc>,
    pub reviewed: bool,
    /// 0..=100, higher is more pressing
    pub urgency: u8,
    pub event_start: Option<DateTime<Utc>>,
    pub event_end: Option<DateTime<Utc>>,
}

impl ClassificationRecord {
    pub fn new(
        fingerprint: Fingerprint,
        verdict: Verdict,
        summary: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            category: verdict.category,
            confidence: verdict.confidence,
            rationale: verdict.rationale,
            summary: summary.into(),
            received_at,
            classified_at: Utc::now(),
            reviewed: false,
            urgency: 0,
            event_start: None,
            event_end: None,
        }
    }

    pub fn with_analysis(mut self, analysis: &MessageAnalysis) -> Self {
        self.urgency = analysis.urgency;
        self.event_start = analysis.event.map(|e| e.start);
        self.event_end = analysis.event.map(|e| e.end);
        self
    }

    /// Where the record sits on a timeline: a SCHEDULE message at its event
    /// start when one was found, anything else when it arrived
    pub fn timeline_at(&self) -> DateTime<Utc> {
        match (self.category, self.event_start) {
            (Category::Schedule, Some(start)) => start,
            _ => self.received_at,
        }
    }

    /// Whether this record needs a human to look at it
    pub fn is_pending(&self, threshold: f64) -> bool {
        !self.reviewed && (self.category == Category::Uncertain || self.confidence < threshold)
    }

    /// Same category and confidence as `other`
    pub fn same_verdict(&self, other: &ClassificationRecord) -> bool {
        self.category == other.category && (self.confidence - other.confidence).abs() < 1e-9
    }
}

/// What `upsert` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    Replaced,
}

/// Audit entry written on every user review
#[derive(Debug, Clone, Serialize)]
pub struct ReviewEvent {
    pub fingerprint: Fingerprint,
    pub previous_category: Category,
    pub final_category: Category,
    pub reviewed_at: DateTime<Utc>,
}
