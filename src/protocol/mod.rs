//! Response Envelope
//!
//! The uniform success/error document every toolkit command prints on
//! stdout, plus the exit-code mapping that goes with it.
//!
//! ## Example
//!
//! ```
//! use kvstash::protocol::{ErrorCode, Payload, Response};
//!
//! let ok = Response::success(Payload::Deleted { deleted: true });
//! assert_eq!(ok.to_json(), r#"{"ok":true,"data":{"deleted":true}}"#);
//! assert_eq!(ok.exit_code(), 0);
//!
//! let err = Response::error(ErrorCode::InvalidOp, "Unknown operation: frobnicate");
//! assert_eq!(err.exit_code(), 1);
//! ```

pub mod types;

// Re-export commonly used types for convenience
pub use types::{ErrorBody, ErrorCode, Payload, Response};
