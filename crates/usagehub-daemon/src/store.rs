//! SQLite persistence for usage-statistics snapshots.
//!
//! Append-only: rows are inserted once and never updated. Retention sweeps
//! are owned by an external process; this store only inserts and reads.
//! Concurrent refreshes rely on SQLite's atomic single-row inserts, so the
//! internal mutex only serializes access to the connection handle itself.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;

use usagehub_core::stats::UsageStats;
use usagehub_core::types::{PayloadSource, Snapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("snapshot payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown snapshot source label: {0}")]
    BadSource(String),

    #[error("unreadable snapshot timestamp: {0}")]
    BadTimestamp(String),
}

/// SQLite-backed snapshot store.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) a database at the given filesystem path and run
    /// migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_snapshots (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                payload    TEXT NOT NULL,
                source     TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_session_time
                ON usage_snapshots (session_id, created_at);",
        )?;
        Ok(())
    }

    /// Append one snapshot row and return it with its assigned id.
    pub fn append(
        &self,
        session_id: &str,
        payload: &UsageStats,
        source: PayloadSource,
        timestamp: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError> {
        let payload_text = serde_json::to_string(payload)?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO usage_snapshots (session_id, payload, source, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id,
                payload_text,
                source.as_str(),
                timestamp.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Snapshot {
            id,
            session_id: session_id.to_string(),
            payload: payload.clone(),
            source,
            timestamp,
        })
    }

    /// Snapshots within the time window, oldest first.
    ///
    /// Fetches the most recent `limit` rows and reverses them so the caller
    /// gets chronological order. Parameter bounds are the caller's job; this
    /// store assumes valid input and fails closed on I/O or codec errors.
    pub fn query(
        &self,
        session_id: Option<&str>,
        limit: u32,
        since_hours_ago: u32,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let since = (Utc::now() - Duration::hours(since_hours_ago as i64)).to_rfc3339();
        let rows = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, session_id, payload, source, created_at
                 FROM usage_snapshots
                 WHERE created_at >= ?1
                   AND (?2 IS NULL OR session_id = ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let mapped = stmt.query_map(params![since, session_id, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut snapshots = rows
            .into_iter()
            .map(row_to_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.reverse();
        Ok(snapshots)
    }

    /// Most recent snapshot, optionally scoped to one session.
    pub fn latest(&self, session_id: Option<&str>) -> Result<Option<Snapshot>, StoreError> {
        let row = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, session_id, payload, source, created_at
                 FROM usage_snapshots
                 WHERE (?1 IS NULL OR session_id = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
            )?;
            let mut mapped = stmt.query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            mapped.next().transpose()?
        };

        row.map(row_to_snapshot).transpose()
    }
}

fn row_to_snapshot(
    (id, session_id, payload_text, source_text, created_at): (i64, String, String, String, String),
) -> Result<Snapshot, StoreError> {
    let payload: UsageStats = serde_json::from_str(&payload_text)?;
    let source = match source_text.as_str() {
        "upstream" => PayloadSource::Upstream,
        "fallback" => PayloadSource::Fallback,
        other => return Err(StoreError::BadSource(other.to_string())),
    };
    let timestamp = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::BadTimestamp(created_at))?;
    Ok(Snapshot {
        id,
        session_id,
        payload,
        source,
        timestamp,
    })
}
