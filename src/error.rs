//! Unified error types for the operation engine.
//!
//! A single `Error` enum that every API call funnels into. Operation
//! outcomes travel as [`Status`] values (the same space peers report over
//! the wire); everything else is a local, synchronous rejection. All
//! variants are `Copy` so they pass through completion callbacks and
//! logging without allocation.

use core::fmt;

use crate::engine::status::Status;

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Every fallible engine call funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An operation finished (or was refused) with a non-success status.
    Status(Status),
    /// Header plus payload does not fit in one transport frame.
    MessageTooLarge { size: usize, max: usize },
    /// The operation type is reserved or otherwise unusable.
    InvalidType(u8),
    /// A call was made with arguments the engine cannot act on.
    InvalidArgument(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl Error {
    /// The operation status carried by this error, if any.
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::Status(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(s) => write!(f, "operation failed: {s}"),
            Self::MessageTooLarge { size, max } => {
                write!(f, "message too large ({size} > {max} bytes)")
            }
            Self::InvalidType(t) => write!(f, "invalid operation type {t:#04x}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Status> for Error {
    fn from(s: Status) -> Self {
        Self::Status(s)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
