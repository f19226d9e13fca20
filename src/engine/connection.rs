//! Connections — one logical channel (cport) and its operation table.
//!
//! ```text
//!                         ┌────────────────────────── Connection ──┐
//!  Operation::request_send│  lock ─┬─ state (Enabled/Disabled)     │
//!        ──submit gate───▶│        ├─ outgoing: id → Operation     │
//!  Transport rx           │        ├─ incoming: [Operation]        │
//!        ──recv──────────▶│        └─ next outgoing id             │
//!                         │  quiesced (condvar, active → 0)        │
//!                         └────────────────────────────────────────┘
//! ```
//!
//! An operation sits in a table exactly while its active count is
//! non-zero. Both the table and every active count are only touched with
//! the connection lock held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use super::handler::ProtocolHandler;
use super::header::{HEADER_SIZE, Header};
use super::host::Host;
use super::operation::Operation;
use super::result::Transition;
use super::status::Status;
use crate::error::{Error, Result};

/// Whether new operations may be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Enabled,
    Disabled,
}

struct Table {
    state: ConnectionState,
    outgoing: HashMap<u16, Operation>,
    incoming: Vec<Operation>,
    /// Last outgoing id handed out.
    id_cycle: u16,
}

impl Table {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disabled,
            outgoing: HashMap::new(),
            incoming: Vec::new(),
            id_cycle: 0,
        }
    }

    /// Next free outgoing id: cycles 1..=65535, never 0, skipping ids
    /// still in the table.
    fn next_id(&mut self) -> Option<u16> {
        for _ in 0..u16::MAX {
            self.id_cycle = self.id_cycle % u16::MAX + 1;
            if !self.outgoing.contains_key(&self.id_cycle) {
                return Some(self.id_cycle);
            }
        }
        None
    }
}

pub(crate) struct ConnectionInner {
    cport_id: u16,
    host: Host,
    handler: Option<Arc<dyn ProtocolHandler>>,
    table: Mutex<Table>,
    quiesced: Condvar,
}

/// Shared handle to one connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        host: Host,
        cport_id: u16,
        handler: Option<Arc<dyn ProtocolHandler>>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                cport_id,
                host,
                handler,
                table: Mutex::new(Table::new()),
                quiesced: Condvar::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn is(&self, other: &Weak<ConnectionInner>) -> bool {
        core::ptr::eq(Arc::as_ptr(&self.inner), other.as_ptr())
    }

    pub fn cport_id(&self) -> u16 {
        self.inner.cport_id
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub(crate) fn handler(&self) -> Option<&Arc<dyn ProtocolHandler>> {
        self.inner.handler.as_ref()
    }

    // ── Lifecycle ───────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.table.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == ConnectionState::Enabled
    }

    pub fn enable(&self) {
        self.inner.table.lock().state = ConnectionState::Enabled;
        info!("cport {}: enabled", self.inner.cport_id);
    }

    /// Stop accepting work and cancel everything in flight.
    ///
    /// Outgoing operations finish with [`Status::NotConnected`]; incoming
    /// ones are flushed. Returns once the tables are empty. Must not be
    /// called from a callback or handler running on this host.
    pub fn disable(&self) {
        self.inner.table.lock().state = ConnectionState::Disabled;
        self.cancel_operations(Status::NotConnected);
        info!("cport {}: disabled", self.inner.cport_id);
    }

    /// Disable and unregister from the host.
    pub fn destroy(self) {
        self.disable();
        self.inner.host.forget_connection(&self);
    }

    fn cancel_operations(&self, status: Status) {
        loop {
            let next = {
                let table = self.inner.table.lock();
                table
                    .outgoing
                    .values()
                    .next()
                    .or_else(|| table.incoming.first())
                    .cloned()
            };
            let Some(operation) = next else { break };
            if operation.is_incoming() {
                operation.cancel_incoming(status);
            } else {
                operation.cancel(status);
            }
        }
    }

    /// Operations currently in the tables.
    pub fn active_operations(&self) -> usize {
        let table = self.inner.table.lock();
        table.outgoing.len() + table.incoming.len()
    }

    // ── Outgoing ────────────────────────────────────────────────

    /// Largest request or response payload this connection can carry.
    pub fn payload_size_max(&self) -> usize {
        self.inner.host.payload_size_max()
    }

    /// New outgoing operation with `request_size` and `response_size`
    /// payload bytes.
    pub fn operation_create(
        &self,
        operation_type: u8,
        request_size: usize,
        response_size: usize,
    ) -> Result<Operation> {
        Operation::create_outgoing(self, operation_type, request_size, response_size)
    }

    /// One-shot synchronous exchange.
    ///
    /// Copies `request` out, waits up to `timeout` (`None` uses the host
    /// default) and copies the response payload into `response`, whose
    /// length must match what the peer sends.
    pub fn operation_sync(
        &self,
        operation_type: u8,
        request: &[u8],
        response: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<()> {
        let operation = self.operation_create(operation_type, request.len(), response.len())?;
        operation.request().payload().copy_from_slice(request);

        let timeout = timeout.or_else(|| self.inner.host.config().default_timeout());
        let result = operation.request_send_sync_timeout(timeout);
        if let Err(e) = result {
            debug!(
                "cport {}: synchronous operation type {:#04x} failed: {}",
                self.inner.cport_id, operation_type, e
            );
            return Err(e);
        }

        if let Some(message) = operation.response() {
            response.copy_from_slice(&message.payload());
        }
        Ok(())
    }

    // ── Receive path ────────────────────────────────────────────

    /// Route one inbound frame. Never blocks on handlers or callbacks.
    pub fn recv(&self, data: &[u8]) {
        let cport = self.inner.cport_id;
        if !self.is_enabled() {
            warn!("cport {}: dropping {} received bytes, connection disabled", cport, data.len());
            return;
        }

        let Some(header) = Header::decode(data) else {
            error!("cport {}: message too small ({} bytes)", cport, data.len());
            return;
        };
        let Some(len) = header.frame_len(data.len()) else {
            error!(
                "cport {}: bad message size (header says {}, have {})",
                cport,
                header.size,
                data.len()
            );
            return;
        };
        let frame = &data[..len];

        if header.is_response() {
            self.recv_response(&header, frame);
        } else {
            self.recv_request(&header, frame);
        }
    }

    fn recv_request(&self, header: &Header, frame: &[u8]) {
        let operation = match Operation::create_incoming(self, header, frame) {
            Ok(operation) => operation,
            Err(e) => {
                error!("cport {}: can't create incoming operation: {}", self.inner.cport_id, e);
                return;
            }
        };

        if let Err(e) = self.activate(&operation) {
            warn!(
                "cport {}: dropping request type {:#04x}: {}",
                self.inner.cport_id,
                header.operation_type(),
                e
            );
            return;
        }

        if operation.result_begin() == Transition::Started {
            operation.schedule_completion();
        } else {
            self.deactivate(&operation);
        }
    }

    fn recv_response(&self, header: &Header, frame: &[u8]) {
        let cport = self.inner.cport_id;
        let Some(operation) = self.find_outgoing(header.operation_id) else {
            warn!(
                "cport {}: response for unknown operation {} (type {:#04x})",
                cport,
                header.operation_id,
                header.message_type
            );
            return;
        };
        let Some(response) = operation.response() else {
            return;
        };

        let mut status = Status::from_wire(header.result);
        let expected = response.size();
        if status.is_success() && frame.len() != expected {
            error!(
                "cport {}: bad response size for operation {} ({} != {})",
                cport,
                header.operation_id,
                frame.len(),
                expected
            );
            status = Status::Overflow;
        }

        if operation.result_finish(status).won() {
            // Error responses carry no usable payload.
            let copy = if status.is_success() {
                frame
            } else {
                &frame[..HEADER_SIZE]
            };
            response.fill(copy);
            operation.schedule_completion();
        }
    }

    fn find_outgoing(&self, id: u16) -> Option<Operation> {
        self.inner.table.lock().outgoing.get(&id).cloned()
    }

    // ── Activity tracking ───────────────────────────────────────

    /// Submit gate for an outgoing operation.
    ///
    /// Checks the connection state, moves the result to in-progress and
    /// inserts the operation under a fresh wire id, all under the
    /// connection lock, so teardown either sees the operation in flight
    /// or rejects it. On anything but [`Transition::Started`] the table is
    /// left untouched.
    pub(crate) fn activate_outgoing(&self, operation: &Operation) -> Result<Transition> {
        let mut table = self.inner.table.lock();
        if table.state != ConnectionState::Enabled {
            return Err(Error::Status(Status::NotConnected));
        }
        if operation.active_count() > 0 {
            // Already in flight; begin() turns this into a malfunction.
            return Ok(operation.result_begin());
        }

        let Some(id) = table.next_id() else {
            error!("cport {}: no free operation id", self.inner.cport_id);
            return Err(Error::Status(Status::Retry));
        };
        let transition = operation.result_begin();
        if transition == Transition::Started {
            operation.assign_id(id);
            table.outgoing.insert(id, operation.clone());
            operation.set_active_count(1);
        }
        Ok(transition)
    }

    /// Count one more activity of an incoming operation, inserting it
    /// into the table on the first.
    pub(crate) fn activate(&self, operation: &Operation) -> Result<()> {
        let mut table = self.inner.table.lock();
        if table.state != ConnectionState::Enabled {
            return Err(Error::Status(Status::NotConnected));
        }

        let active = operation.active_count();
        if active == 0 {
            table.incoming.push(operation.clone());
        }
        operation.set_active_count(active + 1);
        Ok(())
    }

    /// Drop one activity, removing from the table on the last.
    pub(crate) fn deactivate(&self, operation: &Operation) {
        let mut table = self.inner.table.lock();
        let active = operation.active_count();
        if active == 0 {
            error!(
                "cport {}: operation {} deactivated while inactive",
                self.inner.cport_id,
                operation.id()
            );
            return;
        }

        operation.set_active_count(active - 1);
        if active == 1 {
            if operation.is_incoming() {
                table.incoming.retain(|o| !o.ptr_eq(operation));
            } else if table
                .outgoing
                .get(&operation.id())
                .is_some_and(|o| o.ptr_eq(operation))
            {
                table.outgoing.remove(&operation.id());
            }
            self.inner.quiesced.notify_all();
        }
    }

    /// Block until `operation` has no activities left.
    pub(crate) fn wait_inactive(&self, operation: &Operation) {
        let mut table = self.inner.table.lock();
        while operation.active_count() > 0 {
            self.inner.quiesced.wait(&mut table);
        }
    }
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("cport", &self.inner.cport_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        debug!("cport {}: connection released", self.cport_id);
    }
}
