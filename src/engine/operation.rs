//! Operations — one request/response exchange on a connection.
//!
//! ```text
//!  outgoing                                 incoming
//!  ────────                                 ────────
//!  operation_create                         Connection::recv (request)
//!       │                                        │ activate, begin
//!  request_send ── gate, begin, id, send         ▼
//!       │                                   Dispatcher ── handler
//!       ▼                                        │
//!  response / send failure / cancel         response_send ── finish, send
//!       │ finish (first writer wins)             │
//!       ▼                                        ▼
//!  Dispatcher ── callback ── deactivate     transport completes ── deactivate
//! ```
//!
//! An operation is a cheap handle; clones share one state. The table
//! entry, queued completion units and messages in transport custody all
//! hold handles, so the operation outlives every party still using it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use super::completion::{Completion, WaitOutcome};
use super::connection::Connection;
use super::header::{Header, TYPE_INVALID, TYPE_RESPONSE};
use super::message::Message;
use super::result::{ResultState, StickyResult, Transition};
use super::status::Status;
use super::transport::{MessageRole, OutboundMessage};
use crate::error::{Error, Result};

/// Completion callback for an outgoing operation.
pub type Callback = Box<dyn FnOnce(&Operation) + Send + 'static>;

/// Direction of an operation relative to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Created locally; the peer answers.
    Outgoing,
    /// Created from a peer's request; the local handler answers.
    Incoming,
    /// Incoming request with id 0; no response is sent.
    IncomingUnidirectional,
}

impl OperationKind {
    pub const fn is_incoming(self) -> bool {
        !matches!(self, Self::Outgoing)
    }
}

struct OperationInner {
    id: AtomicU16,
    operation_type: u8,
    kind: OperationKind,
    connection: Connection,
    request: Arc<Message>,
    response: OnceLock<Arc<Message>>,
    result: StickyResult,
    /// Guarded by the connection lock.
    active: AtomicUsize,
    callback: Mutex<Option<Callback>>,
    completion: Completion,
}

/// Shared handle to one operation.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    // ── Construction ────────────────────────────────────────────

    /// Outgoing operation with preallocated request and response buffers.
    pub(crate) fn create_outgoing(
        connection: &Connection,
        operation_type: u8,
        request_size: usize,
        response_size: usize,
    ) -> Result<Self> {
        if operation_type == TYPE_INVALID {
            warn!(
                "cport {}: refusing operation of reserved type {:#04x}",
                connection.cport_id(),
                operation_type
            );
            return Err(Error::InvalidType(operation_type));
        }
        let mut operation_type = operation_type;
        if operation_type & TYPE_RESPONSE != 0 {
            warn!(
                "cport {}: operation type {:#04x} has the response flag set, masking",
                connection.cport_id(),
                operation_type
            );
            operation_type &= !TYPE_RESPONSE;
        }

        let size_max = connection.host().buffer_size_max();
        let request = Message::alloc(request_size, size_max)?;
        let response = Message::alloc(response_size, size_max)?;
        let request_header = Header::request(operation_type, request_size);
        request.write_header(&request_header);
        response.write_header(&Header::response_to(&request_header, response_size, 0));

        Ok(Self::build(
            connection,
            0,
            operation_type,
            OperationKind::Outgoing,
            request,
            Some(response),
        ))
    }

    /// Incoming operation wrapping a received request frame.
    pub(crate) fn create_incoming(
        connection: &Connection,
        header: &Header,
        frame: &[u8],
    ) -> Result<Self> {
        let request = Message::from_frame(frame, connection.host().buffer_size_max())?;
        let kind = if header.operation_id == 0 {
            OperationKind::IncomingUnidirectional
        } else {
            OperationKind::Incoming
        };
        Ok(Self::build(
            connection,
            header.operation_id,
            header.operation_type(),
            kind,
            request,
            None,
        ))
    }

    fn build(
        connection: &Connection,
        id: u16,
        operation_type: u8,
        kind: OperationKind,
        request: Message,
        response: Option<Message>,
    ) -> Self {
        let slot = OnceLock::new();
        if let Some(response) = response {
            let _ = slot.set(Arc::new(response));
        }
        Self {
            inner: Arc::new(OperationInner {
                id: AtomicU16::new(id),
                operation_type,
                kind,
                connection: connection.clone(),
                request: Arc::new(request),
                response: slot,
                result: StickyResult::new(),
                active: AtomicUsize::new(0),
                callback: Mutex::new(None),
                completion: Completion::new(),
            }),
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    /// Wire id. Zero until an outgoing operation is first submitted.
    pub fn id(&self) -> u16 {
        self.inner.id.load(Ordering::Acquire)
    }

    pub fn operation_type(&self) -> u8 {
        self.inner.operation_type
    }

    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    pub fn is_incoming(&self) -> bool {
        self.inner.kind.is_incoming()
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn request(&self) -> &Message {
        &self.inner.request
    }

    /// Response buffer. Always present for outgoing operations; for
    /// incoming ones only after [`Operation::response_alloc`].
    pub fn response(&self) -> Option<&Message> {
        self.inner.response.get().map(|m| &**m)
    }

    pub fn result_state(&self) -> ResultState {
        self.inner.result.get()
    }

    /// Final result as a `Result`.
    ///
    /// Reading before the result is final is a caller bug; it is logged
    /// and reported as an error.
    pub fn result(&self) -> Result<()> {
        match self.inner.result.get() {
            ResultState::Final(status) => status.into_result(),
            state => {
                warn!(
                    "cport {}: operation {} result read while {:?}",
                    self.inner.connection.cport_id(),
                    self.id(),
                    state
                );
                Err(Error::InvalidArgument("operation result is not final"))
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    /// Number of in-flight activities (table entry, queued completion,
    /// response in transport custody).
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same operation.
    pub fn ptr_eq(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Connection-lock-only helpers.

    pub(crate) fn set_active_count(&self, count: usize) {
        self.inner.active.store(count, Ordering::Release);
    }

    pub(crate) fn result_begin(&self) -> Transition {
        self.inner.result.begin()
    }

    pub(crate) fn result_finish(&self, status: Status) -> Transition {
        self.inner.result.finish(status)
    }

    pub(crate) fn assign_id(&self, id: u16) {
        self.inner.id.store(id, Ordering::Release);
        self.inner.request.set_operation_id(id);
        if let Some(response) = self.inner.response.get() {
            response.set_operation_id(id);
        }
    }

    // ── Incoming: response buffer ───────────────────────────────

    /// Allocate the response for an incoming request, once.
    pub fn response_alloc(&self, payload_size: usize) -> Result<()> {
        match self.inner.kind {
            OperationKind::Outgoing => {
                return Err(Error::InvalidArgument(
                    "outgoing operations preallocate their response",
                ));
            }
            OperationKind::IncomingUnidirectional => {
                return Err(Error::InvalidArgument(
                    "unidirectional operations carry no response",
                ));
            }
            OperationKind::Incoming => {}
        }

        let size_max = self.inner.connection.host().buffer_size_max();
        let message = Message::alloc(payload_size, size_max)?;
        message.write_header(&Header::response_to(
            &self.inner.request.header(),
            payload_size,
            0,
        ));
        self.inner
            .response
            .set(Arc::new(message))
            .map_err(|_| Error::InvalidArgument("response already allocated"))
    }

    // ── Outgoing: submission ────────────────────────────────────

    /// Submit the request. `callback` runs on a dispatcher thread once the
    /// result is final.
    ///
    /// On `Err` the callback is dropped unrun. A disabled connection
    /// leaves the result unset; a transport refusal records it as final.
    pub fn request_send<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Operation) + Send + 'static,
    {
        if self.is_incoming() {
            return Err(Error::InvalidArgument("only outgoing operations can be sent"));
        }
        let connection = &self.inner.connection;

        {
            // Held across the gate so a racing completion unit cannot
            // take the slot before the callback is in it.
            let mut slot = self.inner.callback.lock();
            match connection.activate_outgoing(self)? {
                Transition::Started => *slot = Some(Box::new(callback)),
                Transition::Finalized => {
                    // Resubmitted while in flight: the first submission
                    // completes with a malfunction.
                    drop(slot);
                    self.schedule_completion();
                    return Err(Error::Status(Status::Malfunction));
                }
                Transition::Ignored => return Err(Error::Status(Status::Malfunction)),
            }
        }

        debug!(
            "cport {}: sending operation {} type {:#04x}",
            connection.cport_id(),
            self.id(),
            self.inner.operation_type
        );

        let message = self.outbound(MessageRole::Request, &self.inner.request);
        if let Err(status) = connection.host().transport().send(connection.cport_id(), message) {
            let status = if status.is_success() { Status::Io } else { status };
            warn!(
                "cport {}: transport refused operation {}: {}",
                connection.cport_id(),
                self.id(),
                status
            );
            if self.inner.result.finish(status).won() {
                self.inner.callback.lock().take();
                connection.deactivate(self);
            }
            // Otherwise a racing cancel already scheduled completion,
            // which deactivates.
            return Err(Error::Status(status));
        }
        Ok(())
    }

    /// Submit and block using the connection's default timeout.
    pub fn request_send_sync(&self) -> Result<()> {
        self.request_send_sync_timeout(self.inner.connection.host().config().default_timeout())
    }

    /// Submit and block until the result is final.
    ///
    /// `None` waits forever. On timeout or [`Operation::interrupt`] the
    /// operation is cancelled; whatever result wins is returned.
    pub fn request_send_sync_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.request_send(|op: &Operation| op.inner.completion.complete())?;

        match self.inner.completion.wait(timeout) {
            WaitOutcome::Completed => {}
            WaitOutcome::TimedOut => self.cancel(Status::Timeout),
            WaitOutcome::Interrupted => self.cancel(Status::Interrupted),
        }
        self.result()
    }

    /// Wake a thread blocked in a synchronous send on this operation.
    pub fn interrupt(&self) {
        self.inner.completion.interrupt();
    }

    // ── Cancellation ────────────────────────────────────────────

    /// Cancel an outgoing operation with `status`.
    ///
    /// Returns once the operation is inactive. If another result won the
    /// race, that result stands. Must not be called from the operation's
    /// own callback.
    pub fn cancel(&self, status: Status) {
        if self.is_incoming() {
            warn!(
                "cport {}: cancel called on incoming operation {}",
                self.inner.connection.cport_id(),
                self.id()
            );
            return;
        }

        if self.inner.result.finish(status).won() {
            debug!(
                "cport {}: operation {} cancelled: {}",
                self.inner.connection.cport_id(),
                self.id(),
                status
            );
            let message = self.outbound(MessageRole::Request, &self.inner.request);
            self.inner.connection.host().transport().cancel(&message);
            self.schedule_completion();
        }

        self.inner.connection.wait_inactive(self);
    }

    /// Cancel an incoming operation, waiting for its handler to finish.
    pub fn cancel_incoming(&self, status: Status) {
        if !self.is_incoming() {
            warn!(
                "cport {}: cancel_incoming called on outgoing operation {}",
                self.inner.connection.cport_id(),
                self.id()
            );
            return;
        }

        if self.inner.kind == OperationKind::Incoming {
            // The handler has run and its response (if any) is queued
            // once this returns.
            while self.inner.completion.wait(None) == WaitOutcome::Interrupted {}

            if !self.inner.result.finish(status).won() {
                if let Some(response) = self.inner.response.get() {
                    let message = self.outbound(MessageRole::Response, response);
                    self.inner.connection.host().transport().cancel(&message);
                }
            }
        }

        self.inner.connection.wait_inactive(self);
    }

    // ── Completion ──────────────────────────────────────────────

    fn outbound(&self, role: MessageRole, message: &Arc<Message>) -> OutboundMessage {
        OutboundMessage::new(self.clone(), role, Arc::clone(message))
    }

    /// Queue this operation's completion unit on the dispatcher.
    pub(crate) fn schedule_completion(&self) {
        let operation = self.clone();
        self.inner
            .connection
            .host()
            .dispatcher()
            .queue(Box::new(move || operation.run_completion()));
    }

    fn run_completion(&self) {
        if self.is_incoming() {
            self.handle_request();
        } else {
            let callback = self.inner.callback.lock().take();
            match callback {
                Some(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                        error!(
                            "cport {}: callback for operation {} panicked",
                            self.inner.connection.cport_id(),
                            self.id()
                        );
                    }
                }
                None => trace!("operation {}: no callback", self.id()),
            }
        }
        self.inner.connection.deactivate(self);
    }

    fn handle_request(&self) {
        let connection = &self.inner.connection;
        let operation_type = self.inner.operation_type;

        let status = match connection.handler() {
            Some(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler.request_recv(operation_type, self))) {
                    Ok(status) => status,
                    Err(_) => {
                        error!(
                            "cport {}: handler panicked on request type {:#04x}",
                            connection.cport_id(),
                            operation_type
                        );
                        Status::Malfunction
                    }
                }
            }
            None => {
                warn!(
                    "cport {}: no protocol handler for request type {:#04x}",
                    connection.cport_id(),
                    operation_type
                );
                Status::ProtocolBad
            }
        };

        if let Err(e) = self.response_send(status) {
            error!(
                "cport {}: failed to send response for type {:#04x}: {}",
                connection.cport_id(),
                operation_type,
                e
            );
        }
        self.inner.completion.complete();
    }

    fn response_send(&self, status: Status) -> Result<()> {
        let connection = &self.inner.connection;
        let bidirectional = self.inner.kind == OperationKind::Incoming;

        if bidirectional && self.inner.response.get().is_none() {
            if let Err(e) = self.response_alloc(0) {
                let _ = self.inner.result.finish(Status::NoMemory);
                return Err(e);
            }
        }

        if !self.inner.result.finish(status).won() {
            return Err(Error::Status(Status::Io));
        }
        if !bidirectional {
            return Ok(());
        }

        let Some(response) = self.inner.response.get() else {
            return Err(Error::Status(Status::NoMemory));
        };
        connection.activate(self)?;
        response.set_result(status.to_wire());

        let message = self.outbound(MessageRole::Response, response);
        if let Err(status) = connection.host().transport().send(connection.cport_id(), message) {
            connection.deactivate(self);
            return Err(Error::Status(status));
        }
        Ok(())
    }

    /// Transport report for a message of this operation.
    pub(crate) fn message_sent(&self, role: MessageRole, result: std::result::Result<(), Status>) {
        match role {
            MessageRole::Response => {
                if let Err(status) = result {
                    error!(
                        "cport {}: error sending response {:#04x}: {}",
                        self.inner.connection.cport_id(),
                        self.inner.operation_type | TYPE_RESPONSE,
                        status
                    );
                }
                self.inner.connection.deactivate(self);
            }
            MessageRole::Request => {
                if let Err(status) = result {
                    let status = if status.is_success() { Status::Io } else { status };
                    if self.inner.result.finish(status).won() {
                        self.schedule_completion();
                    }
                }
            }
        }
    }
}

impl core::fmt::Debug for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Operation")
            .field("cport", &self.inner.connection.cport_id())
            .field("id", &self.id())
            .field("type", &self.inner.operation_type)
            .field("kind", &self.inner.kind)
            .field("result", &self.inner.result.get())
            .field("active", &self.active_count())
            .finish()
    }
}

impl Drop for OperationInner {
    fn drop(&mut self) {
        trace!(
            "cport {}: operation {} type {:#04x} released",
            self.connection.cport_id(),
            self.id.load(Ordering::Relaxed),
            self.operation_type
        );
    }
}
