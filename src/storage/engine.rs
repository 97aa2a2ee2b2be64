//! SQLite Storage Engine
//!
//! This module owns the on-disk table that every `kv` invocation shares.
//! It knows nothing about expiry rules; it stores and removes rows and
//! leaves the liveness decision to [`crate::storage::expiry`].
//!
//! ## Design Decisions
//!
//! 1. **One file, many processes**: each invocation opens its own connection,
//!    so all coordination happens through SQLite's file locks.
//! 2. **WAL journal**: readers never block the writer and the writer never
//!    blocks readers.
//! 3. **Bounded busy wait**: a writer that collides with another writer waits
//!    up to the configured timeout, then fails with [`StorageError::Busy`].
//! 4. **Versioned schema**: `PRAGMA user_version` records which migrations
//!    have run; migrations execute under `BEGIN IMMEDIATE` so concurrent
//!    first opens serialize instead of racing.
//!
//! ## Table Layout
//!
//! ```text
//! kv
//! ┌────────┬────────┬────────┬────────────────────┐
//! │ ns     │ key    │ value  │ expires_at         │
//! │ TEXT   │ TEXT   │ TEXT   │ INTEGER (nullable) │
//! └────────┴────────┴────────┴────────────────────┘
//!   PRIMARY KEY (ns, key)
//! ```

use crate::config::StoreConfig;
use crate::storage::expiry;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Highest schema version this build knows how to migrate to.
pub const SCHEMA_VERSION: i64 = 2;

/// Migrations indexed by the version they upgrade *from*.
const MIGRATIONS: [&str; SCHEMA_VERSION as usize] = [
    // v0 -> v1: the entry table (same shape the rest of the toolkit expects)
    "CREATE TABLE IF NOT EXISTS kv (
        ns TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT,
        expires_at INTEGER,
        PRIMARY KEY (ns, key)
    );",
    // v1 -> v2: keep purge-expired off a full table scan
    "CREATE INDEX IF NOT EXISTS kv_expires_at ON kv (expires_at)
        WHERE expires_at IS NOT NULL;",
];

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The directory holding the database could not be created
    #[error("failed to create data directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database file could not be opened
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Another writer held the lock for longer than the busy timeout
    #[error("{context}: database busy: {source}")]
    Busy {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Any other SQLite failure (I/O, corruption, permissions, ...)
    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The file was written by a newer build
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },
}

impl StorageError {
    /// Returns `true` if this error is a lock timeout.
    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Busy { .. })
    }
}

/// Classifies a SQLite error, separating lock contention from everything else.
fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |source| {
        let busy = matches!(
            &source,
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if busy {
            StorageError::Busy { context, source }
        } else {
            StorageError::Sqlite { context, source }
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Logical partition
    pub namespace: String,
    /// Key, unique within the namespace
    pub key: String,
    /// Opaque payload
    pub value: String,
    /// Absolute expiry in UNIX seconds (None = never expires)
    pub expires_at: Option<i64>,
}

impl Entry {
    /// Checks whether this entry is dead as of `now`.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        expiry::is_expired(self.expires_at, now)
    }
}

/// Handle to the shared database file.
///
/// One handle is opened per invocation and dropped when the invocation
/// finishes; dropping closes the connection.
///
/// # Example
///
/// ```no_run
/// use kvstash::config::StoreConfig;
/// use kvstash::storage::StorageEngine;
///
/// let engine = StorageEngine::open(&StoreConfig::new("/tmp/kv.sqlite")).unwrap();
/// engine.upsert("default", "session", "abc123", Some(1_700_000_000)).unwrap();
/// let entry = engine.fetch("default", "session").unwrap().unwrap();
/// assert_eq!(entry.value, "abc123");
/// ```
pub struct StorageEngine {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish()
    }
}

impl StorageEngine {
    /// Opens (creating if needed) the database described by `config` and
    /// makes sure the schema is current.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        let path = config.path.clone();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.clone(),
            source,
        })?;

        // Busy timeout first so the journal-mode switch below can wait too
        conn.busy_timeout(config.busy_timeout)
            .map_err(db_err("Failed to set busy timeout"))?;

        let wanted = config.journal_mode.pragma_value();
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", wanted, |row| row.get(0))
            .map_err(db_err("Failed to set journal mode"))?;
        if !mode.eq_ignore_ascii_case(wanted) {
            warn!(requested = wanted, actual = %mode, "Journal mode not applied");
        }

        conn.pragma_update(None, "synchronous", config.sync_mode.pragma_value())
            .map_err(db_err("Failed to set synchronous mode"))?;

        let engine = Self { conn, path };
        engine.ensure_schema()?;

        debug!(
            path = %engine.path.display(),
            journal_mode = %mode,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Storage engine opened"
        );
        Ok(engine)
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the schema version recorded in the file.
    pub fn schema_version(&self) -> StorageResult<i64> {
        self.conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(db_err("Failed to read schema version"))
    }

    /// Creates or upgrades the schema. Idempotent and safe to race.
    pub fn ensure_schema(&self) -> StorageResult<()> {
        // Fast path: readers should not take the write lock on every open
        if self.schema_version()? == SCHEMA_VERSION {
            return Ok(());
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(db_err("Failed to begin schema transaction"))?;

        // Re-read under the lock: another process may have migrated meanwhile
        let current: i64 = tx
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(db_err("Failed to read schema version"))?;

        if current > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        let start = current.max(0) as usize;
        for (from, sql) in MIGRATIONS.iter().enumerate().skip(start) {
            tx.execute_batch(sql)
                .map_err(db_err("Failed to apply schema migration"))?;
            debug!(from = from, to = from + 1, "Applied schema migration");
        }

        if current < SCHEMA_VERSION {
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(db_err("Failed to record schema version"))?;
        }

        tx.commit()
            .map_err(db_err("Failed to commit schema transaction"))
    }

    /// Inserts or fully replaces the entry for `(namespace, key)`.
    pub fn upsert(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        expires_at: Option<i64>,
    ) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv (ns, key, value, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![namespace, key, value, expires_at],
            )
            .map_err(db_err("Failed to write entry"))?;

        trace!(ns = namespace, key = key, expires_at = ?expires_at, "Entry written");
        Ok(())
    }

    /// Reads the stored row, expired or not.
    pub fn fetch(&self, namespace: &str, key: &str) -> StorageResult<Option<Entry>> {
        self.conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE ns = ?1 AND key = ?2",
                params![namespace, key],
                |row| {
                    Ok(Entry {
                        namespace: namespace.to_string(),
                        key: key.to_string(),
                        // Rows written by older tools may carry a NULL value
                        value: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        expires_at: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("Failed to read entry"))
    }

    /// Deletes the row if present.
    ///
    /// # Returns
    ///
    /// Returns `true` if a row was removed, `false` if there was nothing to remove.
    pub fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM kv WHERE ns = ?1 AND key = ?2",
                params![namespace, key],
            )
            .map_err(db_err("Failed to delete entry"))?;
        Ok(removed > 0)
    }

    /// Deletes the row only if it is still expired as of `now`.
    ///
    /// A concurrent `set` that refreshed the entry after it was read keeps
    /// its write.
    pub fn delete_if_expired(&self, namespace: &str, key: &str, now: i64) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM kv
                 WHERE ns = ?1 AND key = ?2 AND expires_at IS NOT NULL AND expires_at < ?3",
                params![namespace, key, now],
            )
            .map_err(db_err("Failed to delete expired entry"))?;
        Ok(removed > 0)
    }

    /// Applies [`delete_if_expired`](Self::delete_if_expired) to a batch of
    /// keys in one transaction.
    ///
    /// # Returns
    ///
    /// Returns the number of rows removed.
    pub fn delete_expired_keys(
        &self,
        namespace: &str,
        keys: &[String],
        now: i64,
    ) -> StorageResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(db_err("Failed to begin expiry transaction"))?;

        let mut removed = 0u64;
        {
            let mut stmt = tx
                .prepare_cached(
                    "DELETE FROM kv
                     WHERE ns = ?1 AND key = ?2 AND expires_at IS NOT NULL AND expires_at < ?3",
                )
                .map_err(db_err("Failed to prepare expiry delete"))?;

            for key in keys {
                removed += stmt
                    .execute(params![namespace, key, now])
                    .map_err(db_err("Failed to delete expired entry"))? as u64;
            }
        }

        tx.commit()
            .map_err(db_err("Failed to commit expiry transaction"))?;
        Ok(removed)
    }

    /// Lists every row in a namespace as `(key, expires_at)`, expired rows included.
    pub fn list_keys(&self, namespace: &str) -> StorageResult<Vec<(String, Option<i64>)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, expires_at FROM kv WHERE ns = ?1 ORDER BY key")
            .map_err(db_err("Failed to prepare key listing"))?;

        let rows = stmt
            .query_map(params![namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
            })
            .map_err(db_err("Failed to list keys"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read key listing"))?;

        Ok(rows)
    }

    /// Removes every row, in every namespace, whose expiry is strictly before `now`.
    ///
    /// # Returns
    ///
    /// Returns the number of rows removed.
    pub fn delete_where_expired_before(&self, now: i64) -> StorageResult<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now],
            )
            .map_err(db_err("Failed to purge expired entries"))?;
        Ok(removed as u64)
    }

    /// Returns the number of stored rows, expired or not.
    pub fn count(&self) -> StorageResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(db_err("Failed to count entries"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_engine(tmp: &TempDir) -> StorageEngine {
        StorageEngine::open(&StoreConfig::new(tmp.path().join("kv.sqlite"))).unwrap()
    }

    #[test]
    fn test_upsert_and_fetch() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("default", "key", "value", None).unwrap();
        let entry = engine.fetch("default", "key").unwrap().unwrap();

        assert_eq!(entry.value, "value");
        assert_eq!(entry.expires_at, None);
        assert_eq!(entry.namespace, "default");
    }

    #[test]
    fn test_fetch_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        assert_eq!(engine.fetch("default", "nonexistent").unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_value_and_expiry() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("default", "key", "first", Some(100)).unwrap();
        engine.upsert("default", "key", "second", None).unwrap();

        let entry = engine.fetch("default", "key").unwrap().unwrap();
        assert_eq!(entry.value, "second");
        assert_eq!(entry.expires_at, None);
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[test]
    fn test_fetch_does_not_apply_expiry() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("default", "old", "value", Some(10)).unwrap();

        let entry = engine.fetch("default", "old").unwrap().unwrap();
        assert!(entry.is_expired_at(11));
        assert!(!entry.is_expired_at(10));
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("default", "key", "value", None).unwrap();
        assert!(engine.delete("default", "key").unwrap());
        assert_eq!(engine.fetch("default", "key").unwrap(), None);
        assert!(!engine.delete("default", "key").unwrap()); // Already deleted
    }

    #[test]
    fn test_delete_if_expired_spares_refreshed_entry() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("default", "key", "stale", Some(10)).unwrap();
        // Someone refreshes the entry between our read and our delete
        engine.upsert("default", "key", "fresh", Some(1_000)).unwrap();

        assert!(!engine.delete_if_expired("default", "key", 20).unwrap());
        assert_eq!(
            engine.fetch("default", "key").unwrap().unwrap().value,
            "fresh"
        );

        engine.upsert("default", "key", "stale", Some(10)).unwrap();
        assert!(engine.delete_if_expired("default", "key", 20).unwrap());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("a", "k", "1", None).unwrap();
        engine.upsert("b", "k", "2", None).unwrap();

        assert_eq!(engine.fetch("a", "k").unwrap().unwrap().value, "1");
        assert_eq!(engine.fetch("b", "k").unwrap().unwrap().value, "2");

        engine.delete("a", "k").unwrap();
        assert_eq!(engine.fetch("a", "k").unwrap(), None);
        assert_eq!(engine.fetch("b", "k").unwrap().unwrap().value, "2");
    }

    #[test]
    fn test_list_keys() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("ns", "b", "2", Some(50)).unwrap();
        engine.upsert("ns", "a", "1", None).unwrap();
        engine.upsert("other", "c", "3", None).unwrap();

        let keys = engine.list_keys("ns").unwrap();
        assert_eq!(
            keys,
            vec![("a".to_string(), None), ("b".to_string(), Some(50))]
        );
        assert!(engine.list_keys("missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_expired_keys_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("ns", "a", "1", Some(5)).unwrap();
        engine.upsert("ns", "b", "2", Some(6)).unwrap();
        engine.upsert("ns", "c", "3", None).unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(engine.delete_expired_keys("ns", &keys, 10).unwrap(), 2);
        assert_eq!(engine.count().unwrap(), 1);
        assert_eq!(engine.delete_expired_keys("ns", &[], 10).unwrap(), 0);
    }

    #[test]
    fn test_delete_where_expired_before() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        engine.upsert("a", "past1", "x", Some(90)).unwrap();
        engine.upsert("b", "past2", "x", Some(99)).unwrap();
        engine.upsert("a", "boundary", "x", Some(100)).unwrap();
        engine.upsert("a", "future", "x", Some(200)).unwrap();
        engine.upsert("b", "forever", "x", None).unwrap();

        assert_eq!(engine.delete_where_expired_before(100).unwrap(), 2);
        assert_eq!(engine.count().unwrap(), 3);
        assert!(engine.fetch("a", "boundary").unwrap().is_some());
    }

    #[test]
    fn test_schema_is_idempotent_and_persistent() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("nested").join("kv.sqlite"));

        {
            let engine = StorageEngine::open(&config).unwrap();
            engine.upsert("default", "key", "value", None).unwrap();
            engine.ensure_schema().unwrap();
            engine.ensure_schema().unwrap();
        }

        let engine = StorageEngine::open(&config).unwrap();
        assert_eq!(engine.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(engine.fetch("default", "key").unwrap().unwrap().value, "value");
    }

    #[test]
    fn test_upgrades_table_created_without_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kv.sqlite");

        // A file written by an older tool: table present, user_version = 0
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(MIGRATIONS[0]).unwrap();
            conn.execute(
                "INSERT INTO kv (ns, key, value, expires_at) VALUES ('default', 'legacy', NULL, NULL)",
                [],
            )
            .unwrap();
        }

        let engine = StorageEngine::open(&StoreConfig::new(&path)).unwrap();
        assert_eq!(engine.schema_version().unwrap(), SCHEMA_VERSION);

        let entry = engine.fetch("default", "legacy").unwrap().unwrap();
        assert_eq!(entry.value, "");
    }

    #[test]
    fn test_refuses_newer_schema() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kv.sqlite");

        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let err = StorageEngine::open(&StoreConfig::new(&path)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedSchema { found: 99, supported: SCHEMA_VERSION }
        ));
    }

    #[test]
    fn test_wal_mode_enabled() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp);

        let mode: String = engine
            .conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_rollback_journal_when_configured() {
        use crate::config::{JournalMode, SyncMode};

        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("kv.sqlite"))
            .with_journal_mode(JournalMode::Delete)
            .with_sync_mode(SyncMode::Full);
        let engine = StorageEngine::open(&config).unwrap();

        let mode: String = engine
            .conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "delete");

        // synchronous: 2 = FULL
        let sync: i64 = engine
            .conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 2);

        engine.upsert("default", "key", "value", None).unwrap();
        assert_eq!(engine.fetch("default", "key").unwrap().unwrap().value, "value");
    }

    #[test]
    fn test_writer_times_out_when_lock_held() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kv.sqlite");
        let config = StoreConfig::new(&path).with_busy_timeout(Duration::from_millis(50));
        let engine = StorageEngine::open(&config).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = engine.upsert("default", "key", "value", None).unwrap_err();
        assert!(err.is_busy(), "expected busy error, got {err}");

        // Readers are not blocked by the pending writer
        assert_eq!(engine.fetch("default", "key").unwrap(), None);

        holder.execute_batch("ROLLBACK").unwrap();
        engine.upsert("default", "key", "value", None).unwrap();
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kv.sqlite");
        let _ = StorageEngine::open(&StoreConfig::new(&path)).unwrap();

        let writers = 8;
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    // Each thread gets its own connection, like a separate process
                    let engine = StorageEngine::open(&StoreConfig::new(&path)).unwrap();
                    barrier.wait();
                    (0..20)
                        .map(|n| engine.upsert("default", "shared", &format!("w{i}-{n}"), None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut committed = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            for (n, result) in handle.join().unwrap().into_iter().enumerate() {
                match result {
                    Ok(()) => committed.push(format!("w{i}-{n}")),
                    Err(err) => assert!(err.is_busy(), "unexpected error: {err}"),
                }
            }
        }

        let engine = StorageEngine::open(&StoreConfig::new(&path)).unwrap();
        assert_eq!(engine.count().unwrap(), 1);
        let entry = engine.fetch("default", "shared").unwrap().unwrap();
        assert!(committed.contains(&entry.value));
    }
}
