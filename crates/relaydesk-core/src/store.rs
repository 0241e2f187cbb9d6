//! Durable storage for threads and their history.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE threads (
//!     id TEXT PRIMARY KEY,
//!     topic TEXT,
//!     display_name TEXT,
//!     kind TEXT NOT NULL,              -- 'chat', 'system_log', 'task'
//!     status TEXT NOT NULL,            -- 'active', 'paused', 'stopped', 'archived'
//!     parent_thread_id TEXT,
//!     fork_point_event_id TEXT,
//!     refs TEXT NOT NULL DEFAULT '[]', -- JSON array of linked issues/PRs
//!     created_at INTEGER NOT NULL,     -- microseconds since the epoch
//!     updated_at INTEGER NOT NULL
//! );
//!
//! CREATE TABLE thread_events (
//!     id TEXT PRIMARY KEY,
//!     thread_id TEXT NOT NULL,
//!     seq INTEGER NOT NULL,            -- per-thread insertion order
//!     kind TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     created_at INTEGER NOT NULL,
//!     summarized_count INTEGER,        -- only set on summary events
//!     UNIQUE (thread_id, seq)
//! );
//! ```

use crate::error::{CoreError, Result};
use crate::threads::{ThreadEvent, ThreadRecord, ThreadStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tracing::debug;

/// Storage operations the thread service needs.
///
/// Implementations must be safe to share between tasks. Every method is a
/// short, self-contained operation.
pub trait ThreadStore: Send + Sync {
    fn insert_thread(&self, thread: &ThreadRecord) -> Result<()>;

    fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>>;

    fn list_threads(&self) -> Result<Vec<ThreadRecord>>;

    /// Set status and bump `updated_at`. Returns `false` for an unknown id.
    fn update_status(&self, id: &str, status: ThreadStatus, at: DateTime<Utc>) -> Result<bool>;

    /// Bump `updated_at`. Returns `false` for an unknown id.
    fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Store `event` at the end of its thread and return it with its
    /// assigned `seq`.
    fn append_event(&self, event: &ThreadEvent) -> Result<ThreadEvent>;

    fn get_event(&self, id: &str) -> Result<Option<ThreadEvent>>;

    /// History of a thread ordered by `created_at`, then `seq`.
    fn list_events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>>;

    /// Atomically delete `replaced` from `thread_id` and insert `summary`
    /// in their place. The summary takes the smallest `seq` it replaces.
    fn replace_with_summary(
        &self,
        thread_id: &str,
        replaced: &[String],
        summary: &ThreadEvent,
    ) -> Result<ThreadEvent>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS threads (
        id TEXT PRIMARY KEY,
        topic TEXT,
        display_name TEXT,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        parent_thread_id TEXT,
        fork_point_event_id TEXT,
        refs TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS thread_events (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        summarized_count INTEGER,
        UNIQUE (thread_id, seq)
    );

    CREATE INDEX IF NOT EXISTS idx_threads_parent ON threads(parent_thread_id);
    CREATE INDEX IF NOT EXISTS idx_events_thread_order
        ON thread_events(thread_id, created_at, seq);
"#;

const THREAD_COLUMNS: &str = "id, topic, display_name, kind, status, parent_thread_id, \
     fork_point_event_id, refs, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, thread_id, seq, kind, content, created_at, summarized_count";

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(idx, Type::Integer, "timestamp out of range"))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = CoreError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn row_to_thread(row: &Row<'_>) -> rusqlite::Result<ThreadRecord> {
    let refs_json: String = row.get(7)?;
    Ok(ThreadRecord {
        id: row.get(0)?,
        topic: row.get(1)?,
        display_name: row.get(2)?,
        kind: parsed(row, 3)?,
        status: parsed(row, 4)?,
        parent_thread_id: row.get(5)?,
        fork_point_event_id: row.get(6)?,
        refs: serde_json::from_str(&refs_json).map_err(|e| conversion_error(7, Type::Text, e))?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ThreadEvent> {
    let summarized: Option<i64> = row.get(6)?;
    Ok(ThreadEvent {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        seq: row.get(2)?,
        kind: parsed(row, 3)?,
        content: row.get(4)?,
        created_at: timestamp(row, 5)?,
        summarized_count: summarized.map(|n| n.max(0) as u64),
    })
}

fn insert_event(conn: &Connection, event: &ThreadEvent) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO thread_events (id, thread_id, seq, kind, content, created_at, summarized_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id,
            event.thread_id,
            event.seq,
            event.kind.as_str(),
            event.content,
            event.created_at.timestamp_micros(),
            event.summarized_count.map(|n| n as i64),
        ],
    )?;
    Ok(())
}

/// [`ThreadStore`] backed by a single SQLite connection.
pub struct SqliteThreadStore {
    conn: Mutex<Connection>,
}

impl SqliteThreadStore {
    /// Open or create a database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened thread store");
        Self::init(conn)
    }

    /// Throwaway store, for tests and one-shot tools.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ThreadStore for SqliteThreadStore {
    fn insert_thread(&self, thread: &ThreadRecord) -> Result<()> {
        let refs_json = serde_json::to_string(&thread.refs)?;
        self.conn.lock().execute(
            &format!("INSERT INTO threads ({THREAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                thread.id,
                thread.topic,
                thread.display_name,
                thread.kind.as_str(),
                thread.status.as_str(),
                thread.parent_thread_id,
                thread.fork_point_event_id,
                refs_json,
                thread.created_at.timestamp_micros(),
                thread.updated_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>> {
        let conn = self.conn.lock();
        let thread = conn
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id],
                row_to_thread,
            )
            .optional()?;
        Ok(thread)
    }

    fn list_threads(&self) -> Result<Vec<ThreadRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads ORDER BY updated_at DESC, id"
        ))?;
        let threads = stmt
            .query_map([], row_to_thread)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(threads)
    }

    fn update_status(&self, id: &str, status: ThreadStatus, at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE threads SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), at.timestamp_micros()],
        )?;
        Ok(changed > 0)
    }

    fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
            params![id, at.timestamp_micros()],
        )?;
        Ok(changed > 0)
    }

    fn append_event(&self, event: &ThreadEvent) -> Result<ThreadEvent> {
        let conn = self.conn.lock();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM thread_events WHERE thread_id = ?1",
            params![event.thread_id],
            |row| row.get(0),
        )?;
        let stored = ThreadEvent {
            seq,
            ..event.clone()
        };
        insert_event(&conn, &stored)?;
        Ok(stored)
    }

    fn get_event(&self, id: &str) -> Result<Option<ThreadEvent>> {
        let conn = self.conn.lock();
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM thread_events WHERE id = ?1"),
                params![id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    fn list_events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM thread_events WHERE thread_id = ?1 \
             ORDER BY created_at, seq"
        ))?;
        let events = stmt
            .query_map(params![thread_id], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn replace_with_summary(
        &self,
        thread_id: &str,
        replaced: &[String],
        summary: &ThreadEvent,
    ) -> Result<ThreadEvent> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut first_seq: Option<i64> = None;
        {
            let mut lookup =
                tx.prepare("SELECT seq FROM thread_events WHERE id = ?1 AND thread_id = ?2")?;
            let mut delete = tx.prepare("DELETE FROM thread_events WHERE id = ?1")?;
            for id in replaced {
                let seq: Option<i64> = lookup
                    .query_row(params![id, thread_id], |row| row.get(0))
                    .optional()?;
                let Some(seq) = seq else {
                    return Err(CoreError::EventNotInThread {
                        event_id: id.clone(),
                        thread_id: thread_id.to_string(),
                    });
                };
                first_seq = Some(first_seq.map_or(seq, |s| s.min(seq)));
                delete.execute(params![id])?;
            }
        }

        let seq = match first_seq {
            Some(seq) => seq,
            None => tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM thread_events WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )?,
        };
        let stored = ThreadEvent {
            thread_id: thread_id.to_string(),
            seq,
            ..summary.clone()
        };
        insert_event(&tx, &stored)?;
        tx.commit()?;

        debug!(thread_id, replaced = replaced.len(), "history replaced by summary");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::{EventKind, RefKind, ThreadKind, ThreadRef};

    fn store() -> SqliteThreadStore {
        SqliteThreadStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_thread_roundtrip() {
        let store = store();
        let mut thread = ThreadRecord::new(ThreadKind::Task).with_topic("release");
        thread.refs.push(ThreadRef {
            kind: RefKind::PullRequest,
            repo: "acme/api".into(),
            number: 42,
            title: Some("Bump deps".into()),
            url: None,
        });
        store.insert_thread(&thread).unwrap();

        let loaded = store.get_thread(&thread.id).unwrap().unwrap();
        assert_eq!(loaded, thread);
        assert!(store.get_thread("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_status_and_touch() {
        let store = store();
        let thread = ThreadRecord::new(ThreadKind::Chat);
        store.insert_thread(&thread).unwrap();

        let later = thread.updated_at + chrono::Duration::seconds(5);
        assert!(store.update_status(&thread.id, ThreadStatus::Paused, later).unwrap());
        let loaded = store.get_thread(&thread.id).unwrap().unwrap();
        assert_eq!(loaded.status, ThreadStatus::Paused);
        assert_eq!(loaded.updated_at, later);

        assert!(!store.touch("missing", later).unwrap());
    }

    #[test]
    fn test_events_get_sequential_seq() {
        let store = store();
        let thread = ThreadRecord::new(ThreadKind::Chat);
        store.insert_thread(&thread).unwrap();

        for text in ["one", "two", "three"] {
            store
                .append_event(&ThreadEvent::new(&thread.id, EventKind::UserMessage, text))
                .unwrap();
        }
        let events = store.list_events(&thread.id).unwrap();
        let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, [1, 2, 3]);
        assert_eq!(events[2].content, "three");

        let fetched = store.get_event(&events[1].id).unwrap().unwrap();
        assert_eq!(fetched, events[1]);
    }

    #[test]
    fn test_events_ordered_by_timestamp_first() {
        let store = store();
        let thread = ThreadRecord::new(ThreadKind::Chat);
        store.insert_thread(&thread).unwrap();

        let late = ThreadEvent::new(&thread.id, EventKind::UserMessage, "late");
        let mut early = ThreadEvent::new(&thread.id, EventKind::UserMessage, "early");
        early.created_at = late.created_at - chrono::Duration::seconds(60);
        store.append_event(&late).unwrap();
        store.append_event(&early).unwrap();

        let contents: Vec<String> = store
            .list_events(&thread.id)
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(contents, ["early", "late"]);
    }

    #[test]
    fn test_replace_with_summary() {
        let store = store();
        let thread = ThreadRecord::new(ThreadKind::Chat);
        store.insert_thread(&thread).unwrap();
        let events: Vec<ThreadEvent> = (0..4)
            .map(|i| {
                store
                    .append_event(&ThreadEvent::new(&thread.id, EventKind::UserMessage, format!("m{i}")))
                    .unwrap()
            })
            .collect();

        let replaced: Vec<String> = events[..3].iter().map(|e| e.id.clone()).collect();
        let mut summary = ThreadEvent::summary(&thread.id, "m0..m2", 3);
        summary.created_at = events[2].created_at;
        let stored = store.replace_with_summary(&thread.id, &replaced, &summary).unwrap();
        assert_eq!(stored.seq, 1);

        let remaining = store.list_events(&thread.id).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].kind, EventKind::Summary);
        assert_eq!(remaining[0].summarized_count, Some(3));
        assert_eq!(remaining[1].content, "m3");
    }

    #[test]
    fn test_replace_rejects_foreign_event() {
        let store = store();
        let a = ThreadRecord::new(ThreadKind::Chat);
        let b = ThreadRecord::new(ThreadKind::Chat);
        store.insert_thread(&a).unwrap();
        store.insert_thread(&b).unwrap();
        let own = store
            .append_event(&ThreadEvent::new(&a.id, EventKind::UserMessage, "mine"))
            .unwrap();
        let foreign = store
            .append_event(&ThreadEvent::new(&b.id, EventKind::UserMessage, "theirs"))
            .unwrap();

        let err = store
            .replace_with_summary(
                &a.id,
                &[own.id.clone(), foreign.id.clone()],
                &ThreadEvent::summary(&a.id, "x", 2),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::EventNotInThread { .. }));
        // Rolled back: nothing was deleted.
        assert_eq!(store.list_events(&a.id).unwrap().len(), 1);
        assert_eq!(store.list_events(&b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_open_on_disk_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("threads.db");
        let thread = ThreadRecord::new(ThreadKind::Chat);
        {
            let store = SqliteThreadStore::open(&path).unwrap();
            store.insert_thread(&thread).unwrap();
        }
        let reopened = SqliteThreadStore::open(&path).unwrap();
        assert_eq!(reopened.list_threads().unwrap().len(), 1);
    }
}
