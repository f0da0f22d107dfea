use motion_snap_common::history::HISTORY_SCHEMA;
use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// SQLite index of committed frames.
///
/// Schema: a single `history` table, one row per committed episode, keyed by
/// an autoincrement id so commit order is preserved. The JPEG itself lives on
/// disk at `path`, relative to the history directory.
///
/// WAL mode is enabled so the detector (writer) and API server (reader) can
/// operate concurrently without blocking each other.
pub struct HistoryDb {
    conn: Mutex<Connection>,
}

/// A row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord<'a> {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub committed_at_ms: i64,
    pub score: u32,
    pub path: &'a str,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: i64,
    pub seq: i64,
    pub captured_at_ms: i64,
    pub committed_at_ms: i64,
    pub score: i64,
    pub path: String,
}

impl HistoryDb {
    /// Open (or create) the history database, creating its parent directory.
    pub fn open(db_path: &Path) -> SqlResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|_e| rusqlite::Error::InvalidPath(parent.into()))?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn).inspect(|_| {
            info!(path = %db_path.display(), "history database opened");
        })
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch(HISTORY_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a committed frame. Returns the new row id.
    pub fn insert(&self, record: &NewHistoryRecord<'_>) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO history
                (seq, captured_at_ms, committed_at_ms, score, path, width, height, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.seq as i64,
                record.captured_at_ms,
                record.committed_at_ms,
                record.score,
                record.path,
                record.width,
                record.height,
                record.size_bytes as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, score = record.score, path = %record.path, "inserted history entry");
        Ok(id)
    }
}

#[cfg(test)]
impl HistoryDb {
    /// Most recent entries first.
    pub(crate) fn recent(&self, limit: usize) -> SqlResult<Vec<HistoryRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT id, seq, captured_at_ms, committed_at_ms, score, path
             FROM history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(HistoryRecord {
                id: row.get(0)?,
                seq: row.get(1)?,
                captured_at_ms: row.get(2)?,
                committed_at_ms: row.get(3)?,
                score: row.get(4)?,
                path: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, score: u32, path: &str) -> NewHistoryRecord<'_> {
        NewHistoryRecord {
            seq,
            captured_at_ms: 1739871000000 + seq as i64,
            committed_at_ms: 1739871002000 + seq as i64,
            score,
            path,
            width: 640,
            height: 480,
            size_bytes: 1234,
        }
    }

    #[test]
    fn recent_returns_newest_first() {
        let db = HistoryDb::open_in_memory().unwrap();
        let first = db.insert(&record(1, 10, "a.jpg")).unwrap();
        let second = db.insert(&record(2, 30, "b.jpg")).unwrap();
        assert!(second > first);

        let rows = db.recent(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path, "b.jpg");
        assert_eq!(rows[0].score, 30);
        assert_eq!(rows[1].seq, 1);

        assert_eq!(db.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn open_creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/history.db");
        let db = HistoryDb::open(&path).unwrap();
        db.insert(&record(1, 5, "x.jpg")).unwrap();
        assert!(path.exists());
    }
}
