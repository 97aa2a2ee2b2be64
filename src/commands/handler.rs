//! Operation Dispatcher
//!
//! Turns one parsed invocation into exactly one [`Response`].
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ parse op    │───>│ validate    │───>│ open store  │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │        │ ping/version      │ ARG_MISSING      │             │
//! │        ▼                   ▼                  ▼             │
//! │     Response            Response        cmd_*() ──> Response│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Argument problems are reported before the store is opened, so a bad
//! invocation never creates or locks the database file. Any storage failure
//! after that point becomes `STORAGE_FAULT` for the whole invocation.

use crate::config::StoreConfig;
use crate::protocol::{ErrorCode, Payload, Response};
use crate::storage::expiry::{self, Clock, Lookup};
use crate::storage::{StorageEngine, StorageError};
use crate::{DEFAULT_NAMESPACE, TOOL_NAME, VERSION};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// The operations `kv` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Get,
    Del,
    Keys,
    PurgeExpired,
    Ping,
    Version,
}

impl Operation {
    /// Every recognized operation, in help-text order.
    pub const ALL: [Operation; 7] = [
        Operation::Set,
        Operation::Get,
        Operation::Del,
        Operation::Keys,
        Operation::PurgeExpired,
        Operation::Ping,
        Operation::Version,
    ];

    /// Returns the name used on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Set => "set",
            Operation::Get => "get",
            Operation::Del => "del",
            Operation::Keys => "keys",
            Operation::PurgeExpired => "purge-expired",
            Operation::Ping => "ping",
            Operation::Version => "version",
        }
    }

    /// Housekeeping operations answer without opening the store.
    pub const fn touches_storage(self) -> bool {
        !matches!(self, Operation::Ping | Operation::Version)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CommandError::UnknownOperation(s.to_string()))
    }
}

/// One invocation's raw parameters, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation name as given (None = flag absent)
    pub op: Option<String>,
    /// Namespace (defaults to [`DEFAULT_NAMESPACE`])
    pub namespace: String,
    pub key: Option<String>,
    pub value: Option<String>,
    /// TTL in seconds; `<= 0` never expires
    pub ttl: i64,
    /// Minimal payload shapes
    pub compact: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            op: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            key: None,
            value: None,
            ttl: 0,
            compact: false,
        }
    }
}

impl Request {
    /// Creates a request for `op` in the default namespace.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: Some(op.into()),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }
}

/// Why an invocation failed.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required parameter was absent or empty
    #[error("{message}")]
    MissingArgument {
        message: &'static str,
        suggestion: &'static str,
    },

    /// The operation name is not one we know
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The store failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CommandError {
    /// Maps the failure onto the stable error taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::MissingArgument { .. } => ErrorCode::ArgMissing,
            CommandError::UnknownOperation(_) => ErrorCode::InvalidOp,
            CommandError::Storage(_) => ErrorCode::StorageFault,
        }
    }

    /// Renders the failure as an error envelope.
    pub fn into_response(self) -> Response {
        let response = Response::error(self.code(), self.to_string());
        match self {
            CommandError::MissingArgument { suggestion, .. } => response.with_suggestion(suggestion),
            CommandError::UnknownOperation(_) => response.with_suggestion(format!(
                "Valid operations: {}",
                Operation::ALL.map(Operation::as_str).join(", ")
            )),
            CommandError::Storage(_) => response,
        }
    }
}

/// Returns the argument if present and non-empty.
fn required<'a>(
    value: Option<&'a str>,
    message: &'static str,
    suggestion: &'static str,
) -> Result<&'a str, CommandError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingArgument { message, suggestion })
}

/// Checked arguments of a `set`.
#[derive(Debug, Clone, Copy)]
struct SetArgs<'a> {
    key: &'a str,
    value: &'a str,
    ttl: i64,
}

/// A storage operation whose arguments have been checked.
#[derive(Debug)]
enum Call<'a> {
    Set(SetArgs<'a>),
    Get { key: &'a str },
    Del { key: &'a str },
    Keys,
    PurgeExpired,
}

/// Executes `kv` operations against the configured store.
///
/// Holds configuration only; every storage operation opens its own
/// [`StorageEngine`] and drops it before returning.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    config: StoreConfig,
}

impl CommandHandler {
    /// Creates a handler for the store described by `config`.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Executes a request using the system clock.
    pub fn execute(&self, request: &Request) -> Response {
        self.execute_with_clock(request, Clock::system())
    }

    /// Executes a request with `clock` as the invocation's single "now".
    pub fn execute_with_clock(&self, request: &Request, clock: Clock) -> Response {
        match self.dispatch(request, clock) {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    CommandError::Storage(source) => {
                        warn!(error = %source, busy = source.is_busy(), "Storage fault");
                    }
                    other => debug!(code = %other.code(), error = %other, "Rejected request"),
                }
                err.into_response()
            }
        }
    }

    /// Parses, validates and runs one request.
    fn dispatch(&self, request: &Request, clock: Clock) -> Result<Response, CommandError> {
        let op: Operation = required(
            request.op.as_deref(),
            "--op required",
            "Use --op set|get|del|keys|purge-expired|ping|version",
        )?
        .parse()?;

        let call = match op {
            Operation::Ping => return Ok(self.cmd_ping()),
            Operation::Version => return Ok(self.cmd_version()),
            Operation::Set => {
                let message = "--key and --value required";
                let suggestion = "Use --key <key> --value <value>";
                Call::Set(SetArgs {
                    key: required(request.key.as_deref(), message, suggestion)?,
                    value: required(request.value.as_deref(), message, suggestion)?,
                    ttl: request.ttl,
                })
            }
            Operation::Get => Call::Get {
                key: required(request.key.as_deref(), "--key required", "Use --key <key>")?,
            },
            Operation::Del => Call::Del {
                key: required(request.key.as_deref(), "--key required", "Use --key <key>")?,
            },
            Operation::Keys => Call::Keys,
            Operation::PurgeExpired => Call::PurgeExpired,
        };

        let namespace = required(
            Some(request.namespace.as_str()),
            "--ns must not be empty",
            "Omit --ns to use the \"default\" namespace",
        )?;

        debug!(op = %op, ns = namespace, "Executing operation");
        let engine = StorageEngine::open(&self.config)?;

        let response = match call {
            Call::Set(args) => self.cmd_set(&engine, namespace, args, clock, request.compact)?,
            Call::Get { key } => self.cmd_get(&engine, namespace, key, clock, request.compact)?,
            Call::Del { key } => self.cmd_del(&engine, namespace, key)?,
            Call::Keys => self.cmd_keys(&engine, namespace, clock, request.compact)?,
            Call::PurgeExpired => self.cmd_purge_expired(&engine, clock)?,
        };
        Ok(response)
    }

    // ========================================================================
    // Storage operations
    // ========================================================================

    /// set: insert or fully replace an entry
    fn cmd_set(
        &self,
        engine: &StorageEngine,
        namespace: &str,
        args: SetArgs<'_>,
        clock: Clock,
        compact: bool,
    ) -> Result<Response, CommandError> {
        engine.upsert(namespace, args.key, args.value, clock.expires_at_for(args.ttl))?;

        let ns = (!compact).then(|| namespace.to_string());
        Ok(Response::success(Payload::Stored {
            ns,
            key: args.key.to_string(),
        }))
    }

    /// get: read one entry, lazily expiring it
    fn cmd_get(
        &self,
        engine: &StorageEngine,
        namespace: &str,
        key: &str,
        clock: Clock,
        compact: bool,
    ) -> Result<Response, CommandError> {
        let lookup = expiry::lookup(engine, namespace, key, clock)?;

        let response = match (lookup, compact) {
            (Lookup::Live(value), true) => Response::success(Payload::Value(value)),
            (Lookup::Live(value), false) => Response::success(Payload::found(value)),
            (_, true) => Response::empty(),
            (Lookup::Expired, false) => Response::success(Payload::expired()),
            (Lookup::Missing, false) => Response::success(Payload::not_found()),
        };
        Ok(response)
    }

    /// del: idempotent delete
    fn cmd_del(
        &self,
        engine: &StorageEngine,
        namespace: &str,
        key: &str,
    ) -> Result<Response, CommandError> {
        let existed = engine.delete(namespace, key)?;
        debug!(ns = namespace, key = key, existed = existed, "Deleted entry");

        Ok(Response::success(Payload::Deleted { deleted: true }))
    }

    /// keys: live keys of the namespace
    fn cmd_keys(
        &self,
        engine: &StorageEngine,
        namespace: &str,
        clock: Clock,
        compact: bool,
    ) -> Result<Response, CommandError> {
        let keys = expiry::live_keys(engine, namespace, clock)?;

        let payload = if compact {
            Payload::KeyList(keys)
        } else {
            Payload::Keys { keys }
        };
        Ok(Response::success(payload))
    }

    /// purge-expired: bulk removal across all namespaces
    fn cmd_purge_expired(
        &self,
        engine: &StorageEngine,
        clock: Clock,
    ) -> Result<Response, CommandError> {
        let purged = expiry::purge(engine, clock)?;
        Ok(Response::success(Payload::Purged { purged }))
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// ping
    fn cmd_ping(&self) -> Response {
        Response::success(Payload::Pong {
            pong: true,
            tool: TOOL_NAME.to_string(),
        })
    }

    /// version
    fn cmd_version(&self) -> Response {
        Response::success(Payload::Version {
            version: VERSION.to_string(),
            tool: TOOL_NAME.to_string(),
        })
    }
}
