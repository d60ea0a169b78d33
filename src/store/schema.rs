//! SQLite schema definition
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision,
//! so lexical order matches chronological order.

pub const SCHEMA: &str = r#"
-- ============================================
-- INGESTION PROGRESS
-- ============================================

-- Last successfully committed position per source feed
CREATE TABLE IF NOT EXISTS checkpoints (
    feed_id TEXT PRIMARY KEY,              -- 'mail', 'calendar', 'tasks'
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- ============================================
-- CLASSIFICATIONS
-- ============================================

CREATE TABLE IF NOT EXISTS classifications (
    fingerprint TEXT PRIMARY KEY,          -- '{feed}:{source id}'
    category TEXT NOT NULL,                -- 'SCHEDULE', 'TASK', 'SPAM', 'UNCERTAIN'
    confidence REAL NOT NULL,
    rationale TEXT,
    summary TEXT NOT NULL DEFAULT '',
    received_at TEXT NOT NULL,
    classified_at TEXT NOT NULL,
    reviewed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_classifications_received
    ON classifications(received_at DESC);

-- Raw text kept for forced reclassification
CREATE TABLE IF NOT EXISTS messages (
    fingerprint TEXT PRIMARY KEY,
    sender TEXT,
    subject TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    received_at TEXT NOT NULL
);

-- ============================================
-- AUDIT
-- ============================================

CREATE TABLE IF NOT EXISTS review_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    previous_category TEXT NOT NULL,
    final_category TEXT NOT NULL,
    reviewed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_review_log_fingerprint
    ON review_log(fingerprint);
"#;
