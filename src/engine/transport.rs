//! Transport abstraction — any message-oriented, multiplexed channel.
//!
//! Concrete implementations live outside the engine (USB bridges, UART
//! framers, sockets). The crate ships [`LoopbackTransport`] for demos and
//! tests.
//!
//! Contract:
//! - [`Transport::send`] must not block. A message it refuses (returns
//!   `Err`) is never reported again.
//! - Every message it accepts is reported exactly once through
//!   [`OutboundMessage::complete`], successfully or not.
//! - [`Transport::cancel`] may block. It is best-effort: the message may
//!   already be on the wire, in which case it completes normally.
//! - Inbound bytes go to [`Host::data_received`].
//!
//! [`LoopbackTransport`]: super::loopback::LoopbackTransport
//! [`Host::data_received`]: super::host::Host::data_received

use std::sync::Arc;

use super::header::Header;
use super::message::Message;
use super::operation::Operation;
use super::status::Status;

/// Message-oriented transport channel.
pub trait Transport: Send + Sync {
    /// Largest frame (header + payload) this transport can carry.
    fn buffer_size_max(&self) -> usize;

    /// Queue `message` for transmission on `cport_id`.
    fn send(&self, cport_id: u16, message: OutboundMessage) -> Result<(), Status>;

    /// Abort a message previously accepted by [`Transport::send`].
    fn cancel(&self, message: &OutboundMessage);
}

/// Which half of an operation a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Request,
    Response,
}

/// Handle to a message in the transport's custody.
///
/// Keeps its operation alive until the transport lets go of it.
#[derive(Clone)]
pub struct OutboundMessage {
    operation: Operation,
    role: MessageRole,
    message: Arc<Message>,
}

impl OutboundMessage {
    pub(crate) fn new(operation: Operation, role: MessageRole, message: Arc<Message>) -> Self {
        Self {
            operation,
            role,
            message,
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn header(&self) -> Header {
        self.message.header()
    }

    /// Frame bytes ready for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.message.to_bytes()
    }

    /// Whether both handles refer to the same buffer.
    pub fn is_same(&self, other: &OutboundMessage) -> bool {
        Arc::ptr_eq(&self.message, &other.message)
    }

    /// Report the outcome of sending this message.
    ///
    /// A failed request becomes the operation's result (if nothing else
    /// got there first). A sent response releases the operation.
    pub fn complete(self, result: Result<(), Status>) {
        self.operation.message_sent(self.role, result);
    }
}

impl core::fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("role", &self.role)
            .field("header", &self.message.header())
            .finish()
    }
}
