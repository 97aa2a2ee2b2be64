//! Operation Dispatch Module
//!
//! Receives one invocation's parameters, validates them, runs the operation
//! against the storage engine, and returns the response envelope.
//!
//! ## Architecture
//!
//! ```text
//! Command line
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  clap (main.rs) │
//! └────────┬────────┘
//!          │ Request
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Map errors   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Operations
//!
//! - `set`, `get`, `del`, `keys`, `purge-expired`
//! - `ping`, `version` (answered without opening the store)

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandError, CommandHandler, Operation, Request};
