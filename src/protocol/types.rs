//! Response Envelope Types
//!
//! Every `kv` invocation answers with exactly one JSON document shaped like
//! the envelope shared by the rest of the toolkit:
//!
//! ```text
//! { "ok": true,  "data": { ... } }
//! { "ok": false, "error": { "code": "ARG_MISSING", "message": "...", "suggestion": "..." } }
//! ```
//!
//! `data`, `error` and `suggestion` are omitted when empty, so callers can
//! test for presence instead of `null`.
//!
//! ## Exit Codes
//!
//! | Code            | Exit |
//! |-----------------|------|
//! | (success)       | 0    |
//! | `INVALID_OP`    | 1    |
//! | `ARG_MISSING`   | 2    |
//! | `ARG_INVALID`   | 2    |
//! | `STORAGE_FAULT` | 5    |

use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A required parameter was absent or empty
    ArgMissing,
    /// A parameter could not be parsed
    ArgInvalid,
    /// The operation name is not recognized
    InvalidOp,
    /// The backing store failed (I/O, corruption, lock timeout, ...)
    StorageFault,
}

impl ErrorCode {
    /// Returns the process exit code scripting callers rely on.
    pub const fn exit_code(self) -> u8 {
        match self {
            ErrorCode::InvalidOp => 1,
            ErrorCode::ArgMissing | ErrorCode::ArgInvalid => 2,
            ErrorCode::StorageFault => 5,
        }
    }

    /// Returns the wire name of the code.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ArgMissing => "ARG_MISSING",
            ErrorCode::ArgInvalid => "ARG_INVALID",
            ErrorCode::InvalidOp => "INVALID_OP",
            ErrorCode::StorageFault => "STORAGE_FAULT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `error` object of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Operation-specific success payloads.
///
/// Serialized untagged: each variant renders as its bare fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `set`: `{ns, key}` (compact mode drops `ns`)
    Stored {
        #[serde(skip_serializing_if = "Option::is_none")]
        ns: Option<String>,
        key: String,
    },

    /// `get`: `{found, value?, expired?}`
    Lookup {
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expired: Option<bool>,
    },

    /// `del`: `{deleted}`
    Deleted { deleted: bool },

    /// `keys`: `{keys: [...]}`
    Keys { keys: Vec<String> },

    /// `purge-expired`: `{purged}`
    Purged { purged: u64 },

    /// `ping`: `{pong, tool}`
    Pong { pong: bool, tool: String },

    /// `version`: `{version, tool}`
    Version { version: String, tool: String },

    /// Compact `get` hit: the bare value
    Value(String),

    /// Compact `keys`: the bare array
    KeyList(Vec<String>),
}

impl Payload {
    /// `get` found a live entry.
    pub fn found(value: impl Into<String>) -> Self {
        Payload::Lookup {
            found: true,
            value: Some(value.into()),
            expired: None,
        }
    }

    /// `get` found nothing.
    pub fn not_found() -> Self {
        Payload::Lookup {
            found: false,
            value: None,
            expired: None,
        }
    }

    /// `get` found an entry that had expired.
    pub fn expired() -> Self {
        Payload::Lookup {
            found: false,
            value: None,
            expired: Some(true),
        }
    }
}

/// The uniform response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Creates a success response carrying `data`.
    pub fn success(data: Payload) -> Self {
        Response {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates a success response with no `data` (compact misses).
    pub fn empty() -> Self {
        Response {
            ok: true,
            data: None,
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                suggestion: None,
            }),
        }
    }

    /// Attaches a suggestion to an error response. No-op on success.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.suggestion = Some(suggestion.into());
        }
        self
    }

    /// Returns the error code, if this is an error response.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Returns the process exit code for this response.
    pub fn exit_code(&self) -> u8 {
        self.error_code().map_or(0, ErrorCode::exit_code)
    }

    /// Serializes the envelope as a single line of JSON.
    pub fn to_json(&self) -> String {
        // Every field is a plain string, bool, integer or list of strings
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"ok":false,"error":{{"code":"STORAGE_FAULT","message":"failed to encode response: {e}"}}}}"#
            )
        })
    }

    /// Writes the envelope followed by a newline.
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(self.to_json().as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}
