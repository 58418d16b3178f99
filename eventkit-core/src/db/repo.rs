//! Database repository layer
//!
//! Preference storage and event-queue operations over a single SQLite connection.

use crate::error::Result;
use crate::types::{QueueEntry, Record};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps enqueue cheap while a flush is reading
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// Run `f` against the raw connection
    #[cfg(test)]
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Preference operations
    // ============================================

    /// Read a preference value
    pub fn get_preference(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a preference value; returns once committed
    pub fn put_preference(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO preferences (namespace, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![namespace, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ============================================
    // Event queue operations
    // ============================================

    /// Append an event unless the queue already holds `max_events`.
    ///
    /// Returns the new row id, or `None` when the queue is full.
    pub fn insert_event(
        &self,
        namespace: &str,
        event_id: &str,
        record: &Record,
        enqueued_at: DateTime<Utc>,
        max_events: usize,
    ) -> Result<Option<i64>> {
        let record_json = serde_json::to_string(record)?;

        let conn = self.lock();
        let queued: i64 = conn.query_row("SELECT COUNT(*) FROM event_queue", [], |r| r.get(0))?;
        if queued as usize >= max_events {
            return Ok(None);
        }

        conn.execute(
            r#"
            INSERT INTO event_queue (namespace, event_id, record, enqueued_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![namespace, event_id, record_json, enqueued_at.to_rfc3339()],
        )?;
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Highest queue row id, if anything is queued
    pub fn max_event_id(&self) -> Result<Option<i64>> {
        let conn = self.lock();
        let id: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM event_queue", [], |r| r.get(0))?;
        Ok(id)
    }

    /// Count queued events, optionally for one namespace
    pub fn count_events(&self, namespace: Option<&str>) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = match namespace {
            Some(ns) => conn.query_row(
                "SELECT COUNT(*) FROM event_queue WHERE namespace = ?1",
                [ns],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM event_queue", [], |r| r.get(0))?,
        };
        Ok(count as usize)
    }

    /// Page through queued events with `after_id < id <= up_to_id`, oldest first.
    ///
    /// Rows whose record or timestamp cannot be decoded are deleted in the same
    /// call and counted in [`EventPage::discarded`]; they are never returned.
    pub fn pending_events(
        &self,
        namespace: Option<&str>,
        after_id: i64,
        up_to_id: i64,
        limit: usize,
    ) -> Result<EventPage> {
        let mut conn = self.lock();
        let rows = {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, namespace, event_id, record, enqueued_at, attempts
                FROM event_queue
                WHERE id > ?1 AND id <= ?2 AND (?3 IS NULL OR namespace = ?3)
                ORDER BY id ASC
                LIMIT ?4
                "#,
            )?;
            let rows = stmt
                .query_map(
                    params![after_id, up_to_id, namespace, limit as i64],
                    StoredEvent::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut page = EventPage {
            last_id: rows.last().map(|row| row.id),
            ..Default::default()
        };
        let mut corrupt = Vec::new();
        for row in rows {
            let id = row.id;
            match row.decode() {
                Ok(entry) => page.entries.push(entry),
                Err(reason) => {
                    tracing::warn!(id, reason = %reason, "Discarding undecodable queued event");
                    corrupt.push(id);
                }
            }
        }

        if !corrupt.is_empty() {
            let tx = conn.transaction()?;
            for id in &corrupt {
                tx.execute("DELETE FROM event_queue WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            page.discarded = corrupt.len();
        }

        Ok(page)
    }

    /// Remove delivered events
    pub fn delete_events(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            deleted += tx.execute(
                &format!("DELETE FROM event_queue WHERE id IN ({})", placeholders),
                params_from_iter(chunk.iter()),
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Count one more failed attempt for each event, then drop the ones that
    /// reached `max_attempts`. Returns the number dropped.
    pub fn record_failed_attempts(
        &self,
        ids: &[i64],
        error: &str,
        max_attempts: u32,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE event_queue SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
                params![error, id],
            )?;
        }
        let mut dropped = 0;
        for id in ids {
            dropped += tx.execute(
                "DELETE FROM event_queue WHERE id = ?1 AND attempts >= ?2",
                params![id, max_attempts as i64],
            )?;
        }
        tx.commit()?;
        Ok(dropped)
    }

    /// Delete every queued event, optionally for one namespace
    pub fn purge_events(&self, namespace: Option<&str>) -> Result<usize> {
        let conn = self.lock();
        let deleted = match namespace {
            Some(ns) => conn.execute("DELETE FROM event_queue WHERE namespace = ?1", [ns])?,
            None => conn.execute("DELETE FROM event_queue", [])?,
        };
        Ok(deleted)
    }
}

/// One page of [`Database::pending_events`]
#[derive(Debug, Default)]
pub struct EventPage {
    /// Decoded entries, oldest first
    pub entries: Vec<QueueEntry>,
    /// Highest row id the page covered, including discarded rows
    pub last_id: Option<i64>,
    /// Rows deleted because they could not be decoded
    pub discarded: usize,
}

/// Queue row as stored, before the record is decoded
struct StoredEvent {
    id: i64,
    namespace: String,
    event_id: String,
    record: String,
    enqueued_at: String,
    attempts: i64,
}

impl StoredEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            namespace: row.get("namespace")?,
            event_id: row.get("event_id")?,
            record: row.get("record")?,
            enqueued_at: row.get("enqueued_at")?,
            attempts: row.get("attempts")?,
        })
    }

    fn decode(self) -> std::result::Result<QueueEntry, String> {
        let record: Record = serde_json::from_str(&self.record)
            .map_err(|e| format!("record is not valid JSON: {}", e))?;
        if record.is_empty() {
            return Err("record has no fields".to_string());
        }
        let enqueued_at = DateTime::parse_from_rfc3339(&self.enqueued_at)
            .map_err(|e| format!("invalid enqueued_at {:?}: {}", self.enqueued_at, e))?
            .with_timezone(&Utc);

        Ok(QueueEntry {
            id: self.id,
            namespace: self.namespace,
            event_id: self.event_id,
            record,
            enqueued_at,
            attempts: self.attempts.max(0) as u32,
        })
    }
}
