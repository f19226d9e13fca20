//! Protocol handler port — where inbound requests leave the engine.
//!
//! ```text
//!   Connection::recv ──▶ Dispatcher ──▶ ProtocolHandler::request_recv
//!                                              │
//!                          status + optional response payload
//!                                              ▼
//!                                   response sent by the engine
//! ```
//!
//! Handlers run on dispatcher threads and may block. To return data,
//! call [`Operation::response_alloc`] and fill
//! [`Operation::response`]'s payload before returning. Without that,
//! the engine answers with an empty payload carrying the status.

use super::operation::Operation;
use super::status::Status;

/// Handles the requests a peer sends on one connection.
pub trait ProtocolHandler: Send + Sync {
    fn request_recv(&self, operation_type: u8, operation: &Operation) -> Status;
}

impl<F> ProtocolHandler for F
where
    F: Fn(u8, &Operation) -> Status + Send + Sync,
{
    fn request_recv(&self, operation_type: u8, operation: &Operation) -> Status {
        self(operation_type, operation)
    }
}
