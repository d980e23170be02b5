//! # Error Taxonomy
//!
//! Purpose: One error type shared by the drivers and the client facade so a
//! failure keeps its meaning from the backend up to the caller.
//!
//! ## Design Principles
//! 1. **Classify Early**: Validation errors are raised before any network call.
//! 2. **Verbatim Backend Errors**: Driver messages are preserved and annotated
//!    with the failing operation instead of being rewritten.
//! 3. **One Fatal Kind**: Only construction-time connectivity failure is
//!    fatal; every other error is an ordinary recoverable value.

use thiserror::Error;

/// Result type used across the UniKV workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by UniKV drivers and the client facade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// Key (or hash field) is absent.
    #[error("key not found")]
    NotFound,

    /// Stored bytes do not conform to the requested shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Value could not be serialized into the byte encoding.
    #[error("encode error: {0}")]
    Encode(String),

    /// Command or configuration arguments were rejected before dispatch.
    #[error("validation error: {0}")]
    Validation(String),

    /// Command kind is not registered.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// Publish reached zero receivers.
    #[error("no subscribers on channel {channel}")]
    NoSubscribers { channel: String },

    /// Network or protocol failure of a whole round trip.
    #[error("backend error in {op}: {message}")]
    Backend { op: String, message: String },

    /// Server returned an error reply for a single command.
    #[error("server error: {0}")]
    Reply(String),

    /// Batch handle was used after reaching a terminal state.
    #[error("batch already {state}")]
    BatchClosed { state: &'static str },

    /// Connectivity probe failed while constructing a client.
    #[error("cannot connect to {endpoints}: {message}")]
    Connect { endpoints: String, message: String },

    /// Caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Caller deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl CacheError {
    /// Builds a backend error annotated with the failing operation.
    pub fn backend(op: impl Into<String>, message: impl ToString) -> Self {
        CacheError::Backend {
            op: op.into(),
            message: message.to_string(),
        }
    }

    /// Returns true when the process must not keep using the client.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::Connect { .. })
    }

    /// Returns true for a missing key or field.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    /// Returns true when the error came from the caller's context signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CacheError::Cancelled | CacheError::DeadlineExceeded)
    }
}
