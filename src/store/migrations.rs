//! Numbered schema changes applied on top of `SCHEMA`
//!
//! `SCHEMA` is the baseline and only ever uses `CREATE ... IF NOT EXISTS`.
//! Column additions go here so databases created by older builds pick them
//! up too. Each migration runs once, tracked in `schema_version`.

use rusqlite::{params, Connection};

use crate::error::{EngineError, Result};

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "ALTER TABLE classifications ADD COLUMN urgency INTEGER NOT NULL DEFAULT 0;
          ALTER TABLE classifications ADD COLUMN event_start TEXT;
          ALTER TABLE classifications ADD COLUMN event_end TEXT;",
}];

fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Apply pending migrations, returning how many ran
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
    if current > max_known {
        return Err(EngineError::Persistence(format!(
            "database schema version {} is newer than this build supports ({})",
            current, max_known
        )));
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![migration.version],
        )?;
        tx.commit()?;
        log::info!("Applied schema migration v{}", migration.version);
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SCHEMA;

    fn has_column(conn: &Connection, column: &str) -> bool {
        let mut stmt = conn.prepare("PRAGMA table_info(classifications)").unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        names.iter().any(|n| n == column)
    }

    #[test]
    fn test_baseline_database_gains_analysis_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO classifications
                 (fingerprint, category, confidence, summary, received_at, classified_at)
             VALUES ('mail:old', 'TASK', 0.9, 'Old row', '2026-01-01T00:00:00.000Z',
                     '2026-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        assert!(!has_column(&conn, "urgency"));

        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert!(has_column(&conn, "urgency"));
        assert!(has_column(&conn, "event_start"));
        assert!(has_column(&conn, "event_end"));

        let urgency: i64 = conn
            .query_row(
                "SELECT urgency FROM classifications WHERE fingerprint = 'mail:old'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(urgency, 0);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_newer_database_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
    }
}
