//! Storage Module
//!
//! Persistence and expiry for the `kv` store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      expiry (policy)                        │
//! │   Clock · lookup() · live_keys() · purge()                  │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ fetch / delete_if_expired / ...
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StorageEngine (SQLite)                    │
//! │   WAL journal · busy timeout · versioned schema             │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            ▼
//!                  .data/kv.sqlite (shared file)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kvstash::config::StoreConfig;
//! use kvstash::storage::{expiry, Clock, Lookup, StorageEngine};
//!
//! let engine = StorageEngine::open(&StoreConfig::new("/tmp/kv.sqlite")).unwrap();
//! let clock = Clock::system();
//!
//! engine
//!     .upsert("default", "token", "abc123", clock.expires_at_for(3600))
//!     .unwrap();
//!
//! match expiry::lookup(&engine, "default", "token", clock).unwrap() {
//!     Lookup::Live(value) => assert_eq!(value, "abc123"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageError, StorageResult, SCHEMA_VERSION};
pub use expiry::{Clock, Lookup};
