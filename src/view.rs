//! Unified, time-ordered view over classified mail and external items
//!
//! Read-only: building a view never writes. Mail comes from the
//! classification cache, calendar and task items are fetched fresh from
//! their feeds on every call.
//!
//! SCHEDULE mail with an extracted event sits at the event start, next to
//! the calendar entries it announces; other mail sits at its receive time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::iter::Peekable;
use std::sync::Arc;
use std::vec;

use crate::error::{EngineError, Result};
use crate::feed::SourceFeed;
use crate::model::{Category, ClassificationRecord, FeedId, FeedItem, Fingerprint};
use crate::store::ClassificationCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemSource {
    Mail,
    Calendar,
    Task,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::Mail => "MAIL",
            ItemSource::Calendar => "CALENDAR",
            ItemSource::Task => "TASK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewItem {
    pub source: ItemSource,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub summary: String,
    pub urgency: u8,
    pub reviewed: bool,
    /// Set for mail, so the item can be reviewed from the view
    pub fingerprint: Option<Fingerprint>,
}

impl From<ClassificationRecord> for ViewItem {
    fn from(record: ClassificationRecord) -> Self {
        let ends_at = match record.category {
            Category::Schedule => record.event_end,
            _ => None,
        };
        Self {
            source: ItemSource::Mail,
            category: record.category,
            timestamp: record.timeline_at(),
            ends_at,
            summary: clean_subject(&record.summary),
            urgency: record.urgency,
            reviewed: record.reviewed,
            fingerprint: Some(record.fingerprint),
        }
    }
}

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(EngineError::Config(format!(
                "time window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// `before` back and `ahead` forward from `now`
    pub fn around(now: DateTime<Utc>, before: Duration, ahead: Duration) -> Self {
        Self {
            start: now - before,
            end: now + ahead,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

pub struct ViewBuilder {
    cache: Arc<dyn ClassificationCache>,
    external: Vec<Arc<dyn SourceFeed>>,
}

impl ViewBuilder {
    pub fn new(cache: Arc<dyn ClassificationCache>, external: Vec<Arc<dyn SourceFeed>>) -> Self {
        Self { cache, external }
    }

    /// Merge mail and external items in `window`, newest first.
    ///
    /// A failing external feed is left out of this view rather than failing
    /// the whole call.
    pub fn build_view(&self, window: TimeWindow) -> Result<View> {
        let mail = self.cache.records_between(window.start, window.end)?;

        let mut external: Vec<ViewItem> = vec![];
        for feed in &self.external {
            let source = match feed.id() {
                FeedId::Calendar => ItemSource::Calendar,
                FeedId::Tasks => ItemSource::Task,
                FeedId::Mail => continue,
            };
            match feed.list_new_items(None) {
                Ok(batch) => external.extend(
                    batch
                        .items
                        .into_iter()
                        .filter(|item| window.contains(item.timestamp))
                        .map(|item| external_item(source, item)),
                ),
                Err(e) => log::warn!("{} left out of view: {}", feed.id(), e),
            }
        }
        external.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(View {
            mail: mail.into_iter().peekable(),
            external: external.into_iter().peekable(),
        })
    }
}

fn external_item(source: ItemSource, item: FeedItem) -> ViewItem {
    let category = match source {
        ItemSource::Calendar => Category::Schedule,
        _ => Category::Task,
    };
    ViewItem {
        source,
        category,
        timestamp: item.timestamp,
        ends_at: None,
        summary: item.summary,
        urgency: 0,
        reviewed: true,
        fingerprint: None,
    }
}

/// Lazy newest-first merge of two already-sorted sequences.
///
/// Finite, and not restartable: build a new view to read again.
pub struct View {
    mail: Peekable<vec::IntoIter<ClassificationRecord>>,
    external: Peekable<vec::IntoIter<ViewItem>>,
}

impl Iterator for View {
    type Item = ViewItem;

    fn next(&mut self) -> Option<ViewItem> {
        let take_mail = match (self.mail.peek(), self.external.peek()) {
            (Some(m), Some(e)) => m.timeline_at() >= e.timestamp,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if take_mail {
            self.mail.next().map(ViewItem::from)
        } else {
            self.external.next()
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.mail.len() + self.external.len();
        (len, Some(len))
    }
}

/// Strip repeated `Re:` / `Fw:` / `Fwd:` prefixes
pub fn clean_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let rest = ["re", "fwd", "fw"].iter().find_map(|prefix| {
            lower
                .strip_prefix(prefix)
                .and_then(|r| r.trim_start().strip_prefix(|c: char| c == ':' || c == '：'))
                .map(|r| r.len())
        });
        match rest {
            Some(len) => s = s[s.len() - len..].trim_start(),
            None => break,
        }
    }
    if s.is_empty() {
        subject.trim().to_string()
    } else {
        s.to_string()
    }
}
