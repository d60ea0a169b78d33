//! JSON-lines feed implementation
//!
//! Reads items appended to a local `.jsonl` export, one item per line:
//!   {"id": "...", "timestamp": "RFC3339", "subject": "...", "body": "...", "sender": "..."}
//!
//! The cursor is `{offset}:{head}`: the byte offset just past the last
//! complete line that was read, so a line still being written is picked up
//! on the next poll, and a short SHA-256 of the file's first line. A file
//! that shrank below the offset or whose first line changed has been rotated
//! and is read again from the start. A bare offset is accepted as a cursor
//! and gains its head on the next poll.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use super::SourceFeed;
use crate::error::{EngineError, Result};
use crate::model::{Cursor, FeedBatch, FeedId, FeedItem};

pub struct JsonlFeed {
    id: FeedId,
    path: PathBuf,
}

impl JsonlFeed {
    pub fn new(id: FeedId, path: PathBuf) -> Self {
        Self { id, path }
    }

    fn transient(&self, message: impl Into<String>) -> EngineError {
        EngineError::TransientFeed {
            feed: self.id,
            message: message.into(),
        }
    }

    fn parse_cursor(&self, cursor: Option<&Cursor>) -> Result<(u64, Option<String>)> {
        let Some(c) = cursor else {
            return Ok((0, None));
        };
        let (offset, head) = match c.as_str().split_once(':') {
            Some((offset, head)) => (offset, Some(head.to_string())),
            None => (c.as_str(), None),
        };
        let offset = offset
            .parse()
            .map_err(|_| self.transient(format!("invalid cursor '{}'", c)))?;
        Ok((offset, head))
    }
}

/// Hex prefix of the SHA-256 of the first complete line
fn head_digest(reader: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut first = Vec::new();
    reader.read_until(b'\n', &mut first)?;
    if !first.ends_with(b"\n") {
        return Ok(None);
    }
    let digest = Sha256::digest(&first);
    Ok(Some(hex::encode(&digest[..8])))
}

fn encode_cursor(offset: u64, head: Option<&str>) -> String {
    match head {
        Some(head) if offset > 0 => format!("{}:{}", offset, head),
        _ => offset.to_string(),
    }
}

impl SourceFeed for JsonlFeed {
    fn id(&self) -> FeedId {
        self.id
    }

    fn description(&self) -> String {
        format!("{} export at {}", self.id, self.path.display())
    }

    fn is_available(&self) -> bool {
        self.path.exists()
    }

    fn list_new_items(&self, cursor: Option<&Cursor>) -> Result<FeedBatch> {
        let (start, recorded_head) = self.parse_cursor(cursor)?;

        let file = File::open(&self.path)
            .map_err(|e| self.transient(format!("{}: {}", self.path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| self.transient(e.to_string()))?
            .len();
        let mut reader = BufReader::new(file);
        let head = head_digest(&mut reader).map_err(|e| self.transient(e.to_string()))?;

        let replaced = recorded_head
            .as_deref()
            .map_or(false, |recorded| head.as_deref() != Some(recorded));
        let start = if start > len || replaced {
            log::warn!(
                "{} was truncated or replaced since cursor {}; rereading from start",
                self.path.display(),
                start
            );
            0
        } else {
            start
        };

        reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| self.transient(e.to_string()))?;

        let mut items = vec![];
        let mut offset = start;
        let mut line = String::new();
        let mut line_number: u64 = 0;

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| self.transient(e.to_string()))?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            offset += read as u64;
            line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<FeedItem>(&line) {
                Ok(item) => items.push(item),
                Err(e) => log::warn!(
                    "{}: skipping malformed line at byte {}: {}",
                    self.path.display(),
                    offset - read as u64,
                    e
                ),
            }
        }

        log::debug!(
            "{}: {} new item(s) in {} line(s)",
            self.id,
            items.len(),
            line_number
        );

        let next = encode_cursor(offset, head.as_deref());
        let next_cursor =
            (cursor.map(Cursor::as_str) != Some(next.as_str())).then(|| Cursor::new(next));

        Ok(FeedBatch { items, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &std::path::Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_reads_from_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.jsonl");
        write_lines(
            &path,
            &[
                r#"{"id":"m1","timestamp":"2026-01-16T09:00:00Z","subject":"Standup","body":"zoom link"}"#,
                r#"{"id":"m2","timestamp":"2026-01-16T10:00:00Z","subject":"Report","body":"please submit","sender":"boss@example.com"}"#,
            ],
        );

        let feed = JsonlFeed::new(FeedId::Mail, path.clone());
        let first = feed.list_new_items(None).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[1].summary, "Report");
        assert_eq!(first.items[1].sender.as_deref(), Some("boss@example.com"));

        let cursor = first.next_cursor.unwrap();
        let empty = feed.list_new_items(Some(&cursor)).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next_cursor.is_none());

        write_lines(
            &path,
            &[r#"{"id":"m3","timestamp":"2026-01-16T11:00:00Z","subject":"Sale"}"#],
        );
        let next = feed.list_new_items(Some(&cursor)).unwrap();
        assert_eq!(next.items.len(), 1);
        assert_eq!(next.items[0].id, "m3");
    }

    #[test]
    fn test_replaced_file_is_reread_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.jsonl");
        write_lines(
            &path,
            &[
                r#"{"id":"m1","timestamp":"2026-01-16T09:00:00Z","subject":"Standup"}"#,
                r#"{"id":"m2","timestamp":"2026-01-16T10:00:00Z","subject":"Report"}"#,
            ],
        );
        let feed = JsonlFeed::new(FeedId::Mail, path.clone());
        let cursor = feed.list_new_items(None).unwrap().next_cursor.unwrap();

        // Export rotated: new content, longer than the old cursor offset
        std::fs::remove_file(&path).unwrap();
        write_lines(
            &path,
            &[
                r#"{"id":"n1","timestamp":"2026-01-17T09:00:00Z","subject":"Budget review"}"#,
                r#"{"id":"n2","timestamp":"2026-01-17T10:00:00Z","subject":"Offsite plan"}"#,
                r#"{"id":"n3","timestamp":"2026-01-17T11:00:00Z","subject":"Lunch"}"#,
            ],
        );

        let batch = feed.list_new_items(Some(&cursor)).unwrap();
        let ids: Vec<_> = batch.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
        let rotated = batch.next_cursor.unwrap();
        assert_ne!(rotated, cursor);

        let again = feed.list_new_items(Some(&rotated)).unwrap();
        assert!(again.items.is_empty());
        assert!(again.next_cursor.is_none());
    }

    #[test]
    fn test_bare_offset_cursor_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.jsonl");
        write_lines(
            &path,
            &[r#"{"id":"m1","timestamp":"2026-01-16T09:00:00Z","subject":"One"}"#],
        );
        let feed = JsonlFeed::new(FeedId::Mail, path.clone());
        let full = feed.list_new_items(None).unwrap().next_cursor.unwrap();
        let (offset, _) = full.as_str().split_once(':').unwrap();

        let batch = feed.list_new_items(Some(&Cursor::new(offset))).unwrap();
        assert!(batch.items.is_empty());
        assert_eq!(batch.next_cursor, Some(full));
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.jsonl");
        write_lines(
            &path,
            &[r#"{"id":"m1","timestamp":"2026-01-16T09:00:00Z","subject":"One"}"#],
        );
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"id":"m2","timestamp":"2026-01-16T09:05:00Z""#).unwrap();

        let feed = JsonlFeed::new(FeedId::Mail, path);
        let batch = feed.list_new_items(None).unwrap();
        assert_eq!(batch.items.len(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        write_lines(
            &path,
            &[
                "not json",
                r#"{"id":"t1","timestamp":"2026-01-16T09:00:00Z","summary":"File taxes"}"#,
            ],
        );

        let feed = JsonlFeed::new(FeedId::Tasks, path);
        let batch = feed.list_new_items(None).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].summary, "File taxes");
    }

    #[test]
    fn test_missing_file_is_transient() {
        let feed = JsonlFeed::new(FeedId::Calendar, PathBuf::from("/nonexistent/calendar.jsonl"));
        assert!(!feed.is_available());
        let err = feed.list_new_items(None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::TransientFeed {
                feed: FeedId::Calendar,
                ..
            }
        ));
    }
}
