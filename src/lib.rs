//! # kvstash - A Namespaced, TTL-Aware Key-Value Store
//!
//! kvstash gives cooperating processes a durable place to stash small string
//! values under a `(namespace, key)` identity, with optional expiry. Each
//! `kv` invocation runs exactly one operation against a shared SQLite file
//! and exits; there is no server.
//!
//! ## Features
//!
//! - **Namespaces**: independent key spaces sharing one backing file
//! - **TTL Support**: entries can expire after a number of seconds
//! - **Process-Safe**: WAL journaling and a bounded busy timeout let many
//!   short-lived processes read and write the same file at once
//! - **Uniform Envelope**: every outcome is one `{ok, data?, error?}` JSON
//!   document with a stable exit code
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              kv (one invocation)                        │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ clap flags  │───>│  Command    │───>│  Response   │───> stdout       │
//! │  │ (main.rs)   │    │  Handler    │    │  Envelope   │     + exit code  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘                  │
//! │                            │                                            │
//! │                            ▼                                            │
//! │                   ┌─────────────────┐                                   │
//! │                   │ Expiry policy   │                                   │
//! │                   └────────┬────────┘                                   │
//! │                            ▼                                            │
//! │                   ┌─────────────────┐                                   │
//! │                   │ StorageEngine   │───> .data/kv.sqlite (WAL)         │
//! │                   └─────────────────┘                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvstash::commands::{CommandHandler, Request};
//! use kvstash::config::StoreConfig;
//!
//! let handler = CommandHandler::new(StoreConfig::new("/tmp/kv.sqlite"));
//!
//! let set = handler.execute(&Request::new("set").with_key("a").with_value("x").with_ttl(60));
//! assert!(set.ok);
//!
//! let get = handler.execute(&Request::new("get").with_key("a"));
//! println!("{}", get.to_json()); // {"ok":true,"data":{"found":true,"value":"x"}}
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: database location and pragma settings
//! - [`storage`]: SQLite engine and expiry policy
//! - [`commands`]: argument validation and operation dispatch
//! - [`protocol`]: response envelope and exit codes
//!
//! ## Expiry
//!
//! Expired entries are removed in two ways:
//! 1. **Lazy**: `get` and `keys` delete the expired rows they run into
//! 2. **Bulk**: `purge-expired` sweeps every namespace on demand

pub mod commands;
pub mod config;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler, Operation, Request};
pub use config::StoreConfig;
pub use protocol::{ErrorCode, Payload, Response};
pub use storage::{Clock, StorageEngine, StorageError};

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Tool name reported by `ping` and `version`
pub const TOOL_NAME: &str = "kv";

/// Version of kvstash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
