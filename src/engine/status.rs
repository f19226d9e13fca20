//! Operation status codes.
//!
//! One result space for everything an operation can end with: codes a
//! peer reports in a response header, and outcomes the engine produces
//! locally (cancel, teardown, transport refusal).
//!
//! Wire mapping:
//! ```text
//! 0x00 success        0x05 overflow
//! 0x01 interrupted    0x06 invalid
//! 0x02 timeout        0x07 retry
//! 0x03 no-memory      0x08 nonexistent
//! 0x04 protocol-bad   0xfe unknown-error (default)
//!                     0xff malfunction
//! ```

use core::fmt;

pub const WIRE_SUCCESS: u8 = 0x00;
pub const WIRE_INTERRUPTED: u8 = 0x01;
pub const WIRE_TIMEOUT: u8 = 0x02;
pub const WIRE_NO_MEMORY: u8 = 0x03;
pub const WIRE_PROTOCOL_BAD: u8 = 0x04;
pub const WIRE_OVERFLOW: u8 = 0x05;
pub const WIRE_INVALID: u8 = 0x06;
pub const WIRE_RETRY: u8 = 0x07;
pub const WIRE_NONEXISTENT: u8 = 0x08;
pub const WIRE_UNKNOWN_ERROR: u8 = 0xfe;
pub const WIRE_MALFUNCTION: u8 = 0xff;

/// Final status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Interrupted,
    Timeout,
    NoMemory,
    /// Peer does not implement the request type.
    ProtocolBad,
    /// Payload size did not match what was expected.
    Overflow,
    Invalid,
    Retry,
    Nonexistent,
    /// Implementation error; never a legitimate peer answer.
    Malfunction,
    /// Anything the table does not name.
    Io,
    /// Local: the request was cancelled by its submitter.
    Cancelled,
    /// Local: the connection is disabled or being torn down.
    NotConnected,
}

impl Status {
    /// Decode a wire status byte. Unknown codes map to [`Status::Io`].
    pub const fn from_wire(code: u8) -> Self {
        match code {
            WIRE_SUCCESS => Self::Success,
            WIRE_INTERRUPTED => Self::Interrupted,
            WIRE_TIMEOUT => Self::Timeout,
            WIRE_NO_MEMORY => Self::NoMemory,
            WIRE_PROTOCOL_BAD => Self::ProtocolBad,
            WIRE_OVERFLOW => Self::Overflow,
            WIRE_INVALID => Self::Invalid,
            WIRE_RETRY => Self::Retry,
            WIRE_NONEXISTENT => Self::Nonexistent,
            WIRE_MALFUNCTION => Self::Malfunction,
            _ => Self::Io,
        }
    }

    /// Encode for a response header. Local-only outcomes have no wire
    /// code of their own and travel as unknown-error.
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Success => WIRE_SUCCESS,
            Self::Interrupted => WIRE_INTERRUPTED,
            Self::Timeout => WIRE_TIMEOUT,
            Self::NoMemory => WIRE_NO_MEMORY,
            Self::ProtocolBad => WIRE_PROTOCOL_BAD,
            Self::Overflow => WIRE_OVERFLOW,
            Self::Invalid => WIRE_INVALID,
            Self::Retry => WIRE_RETRY,
            Self::Nonexistent => WIRE_NONEXISTENT,
            Self::Malfunction => WIRE_MALFUNCTION,
            Self::Io | Self::Cancelled | Self::NotConnected => WIRE_UNKNOWN_ERROR,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// `Ok(())` for success, the status as an error otherwise.
    pub fn into_result(self) -> crate::Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::Error::Status(self))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Interrupted => "interrupted",
            Self::Timeout => "timed out",
            Self::NoMemory => "out of memory",
            Self::ProtocolBad => "protocol not supported",
            Self::Overflow => "message size mismatch",
            Self::Invalid => "invalid",
            Self::Retry => "try again",
            Self::Nonexistent => "no such device",
            Self::Malfunction => "malfunction",
            Self::Io => "i/o error",
            Self::Cancelled => "cancelled",
            Self::NotConnected => "not connected",
        };
        f.write_str(s)
    }
}
