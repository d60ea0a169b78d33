//! Durable state with SQLite
//!
//! - Checkpoints: last committed cursor per feed
//! - Classification cache: one record per fingerprint, the dedup gate
//! - Message archive: raw mail text for forced reclassification
//! - Review log: audit trail of user decisions
//!
//! A single connection sits behind a mutex, so every trait method is one
//! critical section and readers never observe a half-written row.

mod migrations;
mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::model::{
    Category, ClassificationRecord, Cursor, FeedId, FeedItem, Fingerprint, ReviewEvent,
    UpsertOutcome,
};

pub use schema::SCHEMA;

/// Per-feed ingestion progress
pub trait CheckpointStore: Send + Sync {
    /// `None` on first run: fetch everything the feed still has
    fn get_cursor(&self, feed: FeedId) -> Result<Option<Cursor>>;

    fn advance(&self, feed: FeedId, cursor: &Cursor) -> Result<()>;
}

/// Fingerprint-keyed classification records
pub trait ClassificationCache: Send + Sync {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ClassificationRecord>>;

    /// Insert or replace a record.
    ///
    /// An identical verdict is a no-op. A different category on a reviewed
    /// record fails with `InvariantViolation` and leaves the row untouched.
    fn upsert(&self, record: &ClassificationRecord) -> Result<UpsertOutcome>;

    /// Record a user decision and return the updated record
    fn mark_reviewed(
        &self,
        fingerprint: &Fingerprint,
        category: Category,
    ) -> Result<ClassificationRecord>;

    fn records(&self) -> Result<Vec<ClassificationRecord>>;

    /// Records whose timeline time falls in `[start, end)`, latest first.
    ///
    /// The timeline time is the event start for SCHEDULE mail with an
    /// extracted event and the receive time for everything else.
    fn records_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClassificationRecord>>;
}

/// Raw message text keyed by fingerprint
pub trait MessageArchive: Send + Sync {
    fn archive(&self, fingerprint: &Fingerprint, item: &FeedItem) -> Result<()>;

    fn archived(&self, fingerprint: &Fingerprint) -> Result<Option<FeedItem>>;
}

const RECORD_COLUMNS: &str = "fingerprint, category, confidence, rationale, summary, \
     received_at, classified_at, reviewed, urgency, event_start, event_end";

// Mirrors ClassificationRecord::timeline_at
const TIMELINE_AT: &str =
    "COALESCE(CASE WHEN category = 'SCHEDULE' THEN event_start END, received_at)";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Review decisions for one message, oldest first
    pub fn review_history(&self, fingerprint: &Fingerprint) -> Result<Vec<ReviewEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, previous_category, final_category, reviewed_at
             FROM review_log WHERE fingerprint = ? ORDER BY id",
        )?;

        let rows = stmt.query_map(params![fingerprint.as_str()], |row| {
            Ok(ReviewEvent {
                fingerprint: Fingerprint::from(row.get::<_, String>(0)?),
                previous_category: category_column(row, 1)?,
                final_category: category_column(row, 2)?,
                reviewed_at: timestamp_column(row, 3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

// ============================================
// CHECKPOINTS
// ============================================

impl CheckpointStore for Store {
    fn get_cursor(&self, feed: FeedId) -> Result<Option<Cursor>> {
        let conn = self.conn.lock();
        let cursor: Option<String> = conn
            .query_row(
                "SELECT cursor FROM checkpoints WHERE feed_id = ?",
                params![feed.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.map(Cursor::new))
    }

    fn advance(&self, feed: FeedId, cursor: &Cursor) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checkpoints (feed_id, cursor, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(feed_id) DO UPDATE SET
                 cursor = excluded.cursor,
                 updated_at = excluded.updated_at",
            params![feed.as_str(), cursor.as_str(), format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}

// ============================================
// CLASSIFICATIONS
// ============================================

impl ClassificationCache for Store {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ClassificationRecord>> {
        let conn = self.conn.lock();
        select_record(&conn, fingerprint).map_err(Into::into)
    }

    fn upsert(&self, record: &ClassificationRecord) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let outcome = match select_record(&tx, &record.fingerprint)? {
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO classifications ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        RECORD_COLUMNS
                    ),
                    params![
                        record.fingerprint.as_str(),
                        record.category.as_str(),
                        record.confidence,
                        record.rationale,
                        record.summary,
                        format_timestamp(record.received_at),
                        format_timestamp(record.classified_at),
                        record.reviewed,
                        record.urgency,
                        record.event_start.map(format_timestamp),
                        record.event_end.map(format_timestamp),
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some(existing) if existing.reviewed => {
                if existing.category != record.category {
                    return Err(EngineError::InvariantViolation(format!(
                        "{} was reviewed as {}; refusing automatic reclassification to {}",
                        record.fingerprint, existing.category, record.category
                    )));
                }
                UpsertOutcome::Unchanged
            }
            Some(existing) if existing.same_verdict(record) => UpsertOutcome::Unchanged,
            Some(_) => {
                tx.execute(
                    "UPDATE classifications
                     SET category = ?, confidence = ?, rationale = ?, summary = ?,
                         classified_at = ?, urgency = ?, event_start = ?, event_end = ?
                     WHERE fingerprint = ?",
                    params![
                        record.category.as_str(),
                        record.confidence,
                        record.rationale,
                        record.summary,
                        format_timestamp(record.classified_at),
                        record.urgency,
                        record.event_start.map(format_timestamp),
                        record.event_end.map(format_timestamp),
                        record.fingerprint.as_str(),
                    ],
                )?;
                UpsertOutcome::Replaced
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn mark_reviewed(
        &self,
        fingerprint: &Fingerprint,
        category: Category,
    ) -> Result<ClassificationRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = select_record(&tx, fingerprint)?
            .ok_or_else(|| EngineError::UnknownFingerprint(fingerprint.clone()))?;
        let now = Utc::now();

        tx.execute(
            "UPDATE classifications SET category = ?, reviewed = 1 WHERE fingerprint = ?",
            params![category.as_str(), fingerprint.as_str()],
        )?;
        tx.execute(
            "INSERT INTO review_log (fingerprint, previous_category, final_category, reviewed_at)
             VALUES (?, ?, ?, ?)",
            params![
                fingerprint.as_str(),
                existing.category.as_str(),
                category.as_str(),
                format_timestamp(now),
            ],
        )?;
        tx.commit()?;

        Ok(ClassificationRecord {
            category,
            reviewed: true,
            ..existing
        })
    }

    fn records(&self) -> Result<Vec<ClassificationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM classifications ORDER BY received_at DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn records_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClassificationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {columns} FROM classifications
             WHERE {at} >= ?1 AND {at} < ?2
             ORDER BY {at} DESC",
            columns = RECORD_COLUMNS,
            at = TIMELINE_AT
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            record_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

// ============================================
// MESSAGE ARCHIVE
// ============================================

impl MessageArchive for Store {
    fn archive(&self, fingerprint: &Fingerprint, item: &FeedItem) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (fingerprint, sender, subject, body, received_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(fingerprint) DO UPDATE SET
                 sender = excluded.sender,
                 subject = excluded.subject,
                 body = excluded.body",
            params![
                fingerprint.as_str(),
                item.sender,
                item.summary,
                item.content,
                format_timestamp(item.timestamp),
            ],
        )?;
        Ok(())
    }

    fn archived(&self, fingerprint: &Fingerprint) -> Result<Option<FeedItem>> {
        let conn = self.conn.lock();
        let item = conn
            .query_row(
                "SELECT fingerprint, sender, subject, body, received_at
                 FROM messages WHERE fingerprint = ?",
                params![fingerprint.as_str()],
                |row| {
                    let key: String = row.get(0)?;
                    // Strip the feed prefix to recover the source id
                    let id = key
                        .split_once(':')
                        .map(|(_, id)| id.to_string())
                        .unwrap_or(key);
                    Ok(FeedItem {
                        id,
                        sender: row.get(1)?,
                        summary: row.get(2)?,
                        content: row.get(3)?,
                        timestamp: timestamp_column(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }
}

// ============================================
// ROW HELPERS
// ============================================

fn select_record(
    conn: &Connection,
    fingerprint: &Fingerprint,
) -> rusqlite::Result<Option<ClassificationRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM classifications WHERE fingerprint = ?",
            RECORD_COLUMNS
        ),
        params![fingerprint.as_str()],
        record_from_row,
    )
    .optional()
}

fn record_from_row(row: &Row) -> rusqlite::Result<ClassificationRecord> {
    Ok(ClassificationRecord {
        fingerprint: Fingerprint::from(row.get::<_, String>(0)?),
        category: category_column(row, 1)?,
        confidence: row.get(2)?,
        rationale: row.get(3)?,
        summary: row.get(4)?,
        received_at: timestamp_column(row, 5)?,
        classified_at: timestamp_column(row, 6)?,
        reviewed: row.get(7)?,
        urgency: row.get(8)?,
        event_start: optional_timestamp_column(row, 9)?,
        event_end: optional_timestamp_column(row, 10)?,
    })
}

fn category_column(row: &Row, idx: usize) -> rusqlite::Result<Category> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Verdict;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn record(id: &str, category: Category, confidence: f64) -> ClassificationRecord {
        ClassificationRecord::new(
            Fingerprint::from_source(FeedId::Mail, id),
            Verdict {
                category,
                confidence,
                rationale: Some("test".to_string()),
            },
            format!("subject {}", id),
            Utc::now(),
        )
    }

    #[test]
    fn test_cursor_starts_empty_and_advances() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_cursor(FeedId::Mail).unwrap(), None);

        store.advance(FeedId::Mail, &Cursor::new("120")).unwrap();
        store.advance(FeedId::Mail, &Cursor::new("480")).unwrap();

        assert_eq!(
            store.get_cursor(FeedId::Mail).unwrap(),
            Some(Cursor::new("480"))
        );
        assert_eq!(store.get_cursor(FeedId::Calendar).unwrap(), None);
    }

    #[test]
    fn test_upsert_identical_record_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let rec = record("a1", Category::Task, 0.9);

        assert_eq!(store.upsert(&rec).unwrap(), UpsertOutcome::Inserted);
        let before = store.records().unwrap();

        let mut again = rec.clone();
        again.classified_at = rec.classified_at + ChronoDuration::seconds(30);
        assert_eq!(store.upsert(&again).unwrap(), UpsertOutcome::Unchanged);

        assert_eq!(store.records().unwrap(), before);
    }

    #[test]
    fn test_upsert_replaces_unreviewed_record() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("a1", Category::Uncertain, 0.3)).unwrap();

        let outcome = store.upsert(&record("a1", Category::Schedule, 0.8)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);

        let stored = store.lookup(&"mail:a1".into()).unwrap().unwrap();
        assert_eq!(stored.category, Category::Schedule);
        assert!(!stored.reviewed);
    }

    #[test]
    fn test_upsert_on_reviewed_record_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("a1", Category::Uncertain, 0.2)).unwrap();
        store.mark_reviewed(&"mail:a1".into(), Category::Task).unwrap();
        let before = store.lookup(&"mail:a1".into()).unwrap().unwrap();

        let err = store
            .upsert(&record("a1", Category::Spam, 0.99))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));

        let after = store.lookup(&"mail:a1".into()).unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.category, Category::Task);
        assert!(after.reviewed);
    }

    #[test]
    fn test_upsert_same_category_on_reviewed_record_is_noop() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("a1", Category::Uncertain, 0.2)).unwrap();
        store.mark_reviewed(&"mail:a1".into(), Category::Task).unwrap();

        let outcome = store.upsert(&record("a1", Category::Task, 0.7)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
    }

    #[test]
    fn test_mark_reviewed_writes_audit_log() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("a1", Category::Uncertain, 0.2)).unwrap();

        let updated = store.mark_reviewed(&"mail:a1".into(), Category::Schedule).unwrap();
        assert!(updated.reviewed);
        assert_eq!(updated.category, Category::Schedule);

        let history = store.review_history(&"mail:a1".into()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_category, Category::Uncertain);
        assert_eq!(history[0].final_category, Category::Schedule);
    }

    #[test]
    fn test_mark_reviewed_unknown_fingerprint() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .mark_reviewed(&"mail:missing".into(), Category::Task)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownFingerprint(_)));
    }

    #[test]
    fn test_records_between_is_half_open_and_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc::now() - ChronoDuration::hours(10);

        for (i, id) in ["old", "mid", "new"].iter().enumerate() {
            let mut rec = record(id, Category::Task, 0.9);
            rec.received_at = base + ChronoDuration::hours(i as i64 * 3);
            store.upsert(&rec).unwrap();
        }

        let window = store
            .records_between(base + ChronoDuration::hours(3), base + ChronoDuration::hours(6))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].fingerprint.as_str(), "mail:mid");

        let all = store
            .records_between(base, base + ChronoDuration::hours(7))
            .unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(ids, vec!["mail:new", "mail:mid", "mail:old"]);
    }

    #[test]
    fn test_schedule_records_sit_at_their_event_start() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap();

        let mut meeting = record("meeting", Category::Schedule, 0.9);
        meeting.received_at = base;
        meeting.urgency = 35;
        meeting.event_start = Some(base + ChronoDuration::days(2));
        meeting.event_end = Some(base + ChronoDuration::days(2) + ChronoDuration::hours(1));
        store.upsert(&meeting).unwrap();

        // A task mentioning a date still sits at its receive time
        let mut task = record("task", Category::Task, 0.9);
        task.received_at = base + ChronoDuration::hours(1);
        task.event_start = Some(base + ChronoDuration::days(2));
        store.upsert(&task).unwrap();

        let stored = store.lookup(&"mail:meeting".into()).unwrap().unwrap();
        assert_eq!(stored.urgency, 35);
        assert_eq!(stored.event_start, meeting.event_start);
        assert_eq!(stored.event_end, meeting.event_end);

        let today = store
            .records_between(base, base + ChronoDuration::days(1))
            .unwrap();
        let ids: Vec<_> = today.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(ids, vec!["mail:task"]);

        let ahead = store
            .records_between(base + ChronoDuration::days(1), base + ChronoDuration::days(3))
            .unwrap();
        let ids: Vec<_> = ahead.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(ids, vec!["mail:meeting"]);
    }

    #[test]
    fn test_replacement_refreshes_analysis() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("a1", Category::Uncertain, 0.3)).unwrap();

        let mut updated = record("a1", Category::Schedule, 0.8);
        updated.urgency = 60;
        updated.event_start = Some(Utc.with_ymd_and_hms(2026, 2, 1, 5, 0, 0).unwrap());
        assert_eq!(store.upsert(&updated).unwrap(), UpsertOutcome::Replaced);

        let stored = store.lookup(&"mail:a1".into()).unwrap().unwrap();
        assert_eq!(stored.urgency, 60);
        assert_eq!(stored.event_start, updated.event_start);
        assert_eq!(stored.event_end, None);
    }

    #[test]
    fn test_archive_round_trips_source_id() {
        let store = Store::open_in_memory().unwrap();
        let item = FeedItem {
            id: "18c2".to_string(),
            timestamp: Utc::now(),
            summary: "Budget review".to_string(),
            content: "Please review the attached budget.".to_string(),
            sender: Some("cfo@example.com".to_string()),
        };
        let fp = Fingerprint::from_source(FeedId::Mail, &item.id);
        store.archive(&fp, &item).unwrap();

        let loaded = store.archived(&fp).unwrap().unwrap();
        assert_eq!(loaded.id, "18c2");
        assert_eq!(loaded.content, item.content);
        assert_eq!(loaded.sender.as_deref(), Some("cfo@example.com"));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/mailsieve.db");
        let store = Store::open(&path).unwrap();
        store.advance(FeedId::Tasks, &Cursor::new("7")).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(
            reopened.get_cursor(FeedId::Tasks).unwrap(),
            Some(Cursor::new("7"))
        );
    }
}
