//! # Raw Replies and Wire Commands
//!
//! Purpose: Describe what goes over a driver round trip in driver-neutral
//! terms, so the facade never depends on a concrete client library.
//!
//! ## Design Principles
//! 1. **RESP-Shaped**: `Reply` mirrors the RESP2 reply kinds one to one.
//! 2. **Binary-Safe**: Arguments and bulk payloads are raw bytes.
//! 3. **Errors Are Data**: A server error reply is a `Reply::Error`, not a
//!    failed round trip; callers decide how to surface it.

use std::fmt;

/// Reply value returned by a backend for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<Reply>),
}

impl Reply {
    /// Null bulk reply.
    pub const NIL: Reply = Reply::Bulk(None);

    /// Builds a `+OK` reply.
    pub fn ok() -> Self {
        Reply::Simple(b"OK".to_vec())
    }

    /// Builds a bulk reply from any byte buffer.
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    /// Builds an error reply from a message.
    pub fn error(message: impl AsRef<str>) -> Self {
        Reply::Error(message.as_ref().as_bytes().to_vec())
    }

    /// Returns true for a null bulk reply.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None))
    }

    /// Returns the error message when this is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Reply::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Interprets the reply as an integer (integer replies or numeric text).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            Reply::Bulk(Some(data)) | Reply::Simple(data) => {
                std::str::from_utf8(data).ok()?.parse().ok()
            }
            _ => None,
        }
    }

    /// Interprets the reply as UTF-8 text (bulk, simple, or integer replies).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::Bulk(Some(data)) | Reply::Simple(data) => {
                Some(String::from_utf8_lossy(data).into_owned())
            }
            Reply::Integer(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Consumes the reply and returns its bulk payload, if any.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Reply::Bulk(data) => data,
            Reply::Simple(data) => Some(data),
            _ => None,
        }
    }
}

/// A single command as sent to a backend: name plus binary arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct WireCommand {
    name: &'static str,
    args: Vec<Vec<u8>>,
}

impl WireCommand {
    /// Starts a command with the given (upper-case) name.
    pub fn new(name: &'static str) -> Self {
        WireCommand {
            name,
            args: Vec::new(),
        }
    }

    /// Appends a binary argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Appends an integer argument in its decimal form.
    pub fn arg_int(self, value: i64) -> Self {
        self.arg(value.to_string())
    }

    /// Appends every argument from an iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args.extend(args.into_iter().map(|arg| arg.as_ref().to_vec()));
        self
    }

    /// Command name, e.g. "GET".
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arguments after the command name.
    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.args
    }
}

// Payloads can be large and sensitive; print sizes past the key.
impl fmt::Debug for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx == 0 {
                write!(f, " {}", String::from_utf8_lossy(arg))?;
            } else {
                write!(f, " <{}B>", arg.len())?;
            }
        }
        Ok(())
    }
}
