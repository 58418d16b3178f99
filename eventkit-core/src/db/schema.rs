//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: preferences + event queue
    r#"
    CREATE TABLE IF NOT EXISTS preferences (
        namespace        TEXT NOT NULL,
        key              TEXT NOT NULL,
        value            TEXT NOT NULL,
        updated_at       DATETIME NOT NULL,

        PRIMARY KEY (namespace, key)
    );

    CREATE TABLE IF NOT EXISTS event_queue (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        namespace        TEXT NOT NULL,      -- 'database.table'
        event_id         TEXT NOT NULL UNIQUE,
        record           JSON NOT NULL,
        enqueued_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_event_queue_namespace ON event_queue(namespace, id);
    "#,
    // Version 2: per-event delivery attempts
    r#"
    ALTER TABLE event_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE event_queue ADD COLUMN last_error TEXT;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["preferences", "event_queue"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_attempts_column_defaults_to_zero() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO event_queue (namespace, event_id, record, enqueued_at)
             VALUES ('db.tbl', 'e1', '{}', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let attempts: i64 = conn
            .query_row("SELECT attempts FROM event_queue", [], |r| r.get(0))
            .unwrap();
        assert_eq!(attempts, 0);
    }
}
