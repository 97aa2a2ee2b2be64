//! Store Configuration
//!
//! Everything the storage engine needs to know before it touches the disk:
//! where the database lives, how long a writer waits for a competing writer,
//! and which journaling/sync pragmas to apply.
//!
//! ## Path Resolution
//!
//! ```text
//! --db / KV_DB_PATH            explicit override, always wins
//!        │ (unset)
//!        ▼
//! ./.data/ exists?  ──yes──>  ./.data/kv.sqlite          (development)
//!        │ no
//!        ▼
//! <exe dir>/../../.data/kv.sqlite                        (toolkit layout)
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "kv.sqlite";

/// Name of the data directory shared by the toolkit.
pub const DATA_DIR_NAME: &str = ".data";

/// How long a writer waits for a competing writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Longest busy timeout SQLite accepts (milliseconds as a C `int`).
pub const MAX_BUSY_TIMEOUT_MS: u64 = i32::MAX as u64;

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Write-ahead log: readers never block the writer and vice versa.
    #[default]
    Wal,
    /// Rollback journal. Only useful on filesystems without shared memory.
    Delete,
}

impl JournalMode {
    /// Returns the `journal_mode` pragma value.
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// SQLite `synchronous` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Safe under WAL against application crashes; the usual WAL pairing.
    #[default]
    Normal,
    /// fsync on every commit.
    Full,
}

impl SyncMode {
    /// Returns the `synchronous` pragma value.
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Configuration for opening a [`StorageEngine`](crate::storage::StorageEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Bounded wait for a competing writer.
    pub busy_timeout: Duration,
    /// Journal mode applied on every open.
    pub journal_mode: JournalMode,
    /// Sync mode applied on every open.
    pub sync_mode: SyncMode,
}

impl StoreConfig {
    /// Creates a configuration for the given database file with default pragmas.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
        }
    }

    /// Builds a configuration from an optional explicit path, falling back to
    /// the default location.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None => default_db_path()?,
        };
        Ok(Self::new(path))
    }

    /// Overrides the busy timeout, capped at [`MAX_BUSY_TIMEOUT_MS`].
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout.min(Duration::from_millis(MAX_BUSY_TIMEOUT_MS));
        self
    }

    /// Overrides the journal mode.
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Overrides the sync mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }
}

/// Returns the default database location for this process.
pub fn default_db_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    Ok(db_path_for(&cwd, &exe))
}

/// Resolves the database path given a working directory and executable path.
fn db_path_for(cwd: &Path, exe: &Path) -> PathBuf {
    let dev_dir = cwd.join(DATA_DIR_NAME);
    if dev_dir.is_dir() {
        return dev_dir.join(DB_FILE_NAME);
    }

    let exe_dir = exe.parent().unwrap_or(Path::new("."));
    exe_dir
        .join("..")
        .join("..")
        .join(DATA_DIR_NAME)
        .join(DB_FILE_NAME)
}
