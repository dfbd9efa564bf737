//! # SQLite-backed record store.
//!
//! Stores one JSON document per worker in a single `workers(id, body)` table.
//!
//! ## Exclusive ownership
//! A supervisor owns its database exclusively: `open()` takes a non-blocking advisory
//! lock on `<db>.lock` (and writes its pid there for diagnostics). A second instance
//! pointed at the same file fails with [`StoreError::Unavailable`] instead of racing
//! the first one. The lock is released by `close()` or when the store is dropped.
//!
//! ## Threading
//! `rusqlite` is blocking; every call runs on `spawn_blocking` with the connection
//! behind a mutex.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::records::store::{decode_record, encode_record};
use crate::records::{RecordStore, WorkerRecord};

/// Open database plus the lock file that guards it.
struct Handle {
    conn: Connection,
    lock: File,
}

impl Handle {
    fn open(path: &Path, lock_path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                StoreError::unavailable(format!("cannot create {}: {e}", dir.display()))
            })?;
        }

        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| {
                StoreError::unavailable(format!("cannot open lock {}: {e}", lock_path.display()))
            })?;

        if let Err(e) = FileExt::try_lock_exclusive(&lock) {
            debug!(lock = %lock_path.display(), error = %e, "store lock is held");
            let owner = std::fs::read_to_string(lock_path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            let reason = match owner {
                Some(pid) => format!("{} is locked by another supervisor (pid {pid})", path.display()),
                None => format!("{} is locked by another supervisor", path.display()),
            };
            return Err(StoreError::unavailable(reason));
        }
        if let Err(e) = lock.set_len(0).and_then(|()| writeln!(lock, "{}", std::process::id())) {
            debug!(lock = %lock_path.display(), error = %e, "failed to record owner pid in store lock");
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::unavailable(format!("cannot open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workers (
                 id   TEXT PRIMARY KEY NOT NULL,
                 body TEXT NOT NULL
             )",
        )?;

        Ok(Self { conn, lock })
    }
}

/// Durable [`RecordStore`] on a local SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    handle: Arc<Mutex<Option<Handle>>>,
}

impl SqliteStore {
    /// Creates a store for `path`; nothing is touched until [`RecordStore::open`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the advisory lock file (`<db>.lock`).
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let guard = handle.lock();
            let opened = guard
                .as_ref()
                .ok_or_else(|| StoreError::unavailable("store is not open"))?;
            f(&opened.conn)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn open(&self) -> Result<(), StoreError> {
        let handle = Arc::clone(&self.handle);
        let path = self.path.clone();
        let lock_path = self.lock_path();
        tokio::task::spawn_blocking(move || {
            let mut guard = handle.lock();
            if guard.is_none() {
                *guard = Some(Handle::open(&path, &lock_path)?);
                info!(path = %path.display(), "record store opened");
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn close(&self) -> Result<(), StoreError> {
        let taken = self.handle.lock().take();
        let Some(Handle { conn, lock }) = taken else {
            return Ok(());
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "sqlite close reported an error");
            }
            FileExt::unlock(&lock)?;
            info!(path = %path.display(), "record store closed");
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn get(&self, id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        let key = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM workers WHERE id = ?1", [&key], |row| row.get(0))
                .optional()?;
            Ok(body.and_then(|b| decode_record(&key, &b)))
        })
        .await
    }

    async fn put(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let body = encode_record(record)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workers (id, body) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body",
                [&id, &body],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let key = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM workers WHERE id = ?1", [&key])?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, body FROM workers ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut records = Vec::new();
            for row in rows {
                match row {
                    Ok((id, body)) => records.extend(decode_record(&id, &body)),
                    Err(e) => warn!(error = %e, "skipping unreadable worker row"),
                }
            }
            Ok(records)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::WorkerStatus;

    fn record(id: &str) -> WorkerRecord {
        WorkerRecord::new(id, "test-manager")
    }

    #[tokio::test]
    async fn put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("workers.db"));
        store.open().await.unwrap();

        let mut b = record("worker-b");
        b.transition(WorkerStatus::Running);
        b.pid = Some(10);
        store.put(&b).await.unwrap();
        store.put(&record("worker-a")).await.unwrap();

        let listed: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec!["worker-a", "worker-b"]);
        assert_eq!(store.get("worker-b").await.unwrap(), Some(b));

        store.delete("worker-b").await.unwrap();
        assert_eq!(store.get("worker-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_instance_is_unavailable_until_first_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workers.db");
        let first = SqliteStore::new(&path);
        first.open().await.unwrap();

        let second = SqliteStore::new(&path);
        let err = second.open().await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");

        first.close().await.unwrap();
        second.open().await.unwrap();
        second.put(&record("worker-1")).await.unwrap();
    }

    #[tokio::test]
    async fn operations_fail_when_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("workers.db"));
        assert!(store.list().await.unwrap_err().is_unavailable());

        store.open().await.unwrap();
        store.close().await.unwrap();
        assert!(store.get("worker-1").await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("workers.db"));
        store.open().await.unwrap();
        store.put(&record("worker-1")).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO workers (id, body) VALUES ('worker-2', '{\"id\":\"worker-2\"}')",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO workers (id, body) VALUES ('worker-3', 'not json')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "worker-1");
        assert_eq!(store.get("worker-3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_persists_and_releases_lock_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.db");
        let store = SqliteStore::new(&path);
        store.open().await.unwrap();

        let owner = std::fs::read_to_string(store.lock_path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());

        store.put(&record("worker-1")).await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteStore::new(&path);
        reopened.open().await.unwrap();
        assert!(reopened.get("worker-1").await.unwrap().is_some());
        reopened.close().await.unwrap();
    }

    #[test]
    fn lock_file_sits_next_to_database() {
        let store = SqliteStore::new("/var/lib/wm/workers.db");
        assert_eq!(store.lock_path(), PathBuf::from("/var/lib/wm/workers.db.lock"));
    }
}
