//! Host — one transport, its connections and the completion dispatcher.
//!
//! ```text
//!   Transport rx ──data_received(cport, bytes)──▶ Host
//!                                                  │ cport → Connection
//!                                                  ▼
//!                                            Connection::recv
//! ```
//!
//! The host keeps weak references to its connections; callers own them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::{error, info, warn};
use parking_lot::Mutex;

use super::connection::{Connection, ConnectionInner};
use super::dispatch::Dispatcher;
use super::handler::ProtocolHandler;
use super::header::{HEADER_SIZE, MESSAGE_SIZE_MAX};
use super::transport::Transport;
use crate::config::EngineConfig;
use crate::error::{Error, Result};

struct HostInner {
    transport: Arc<dyn Transport>,
    buffer_size_max: usize,
    config: EngineConfig,
    dispatcher: Dispatcher,
    connections: Mutex<HashMap<u16, Weak<ConnectionInner>>>,
}

/// Shared handle to a host.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

/// Non-owning host handle, for transports that deliver into a host.
#[derive(Clone)]
pub struct WeakHost(Weak<HostInner>);

impl WeakHost {
    pub fn upgrade(&self) -> Option<Host> {
        self.0.upgrade().map(|inner| Host { inner })
    }
}

impl Host {
    /// Bind a host to `transport`.
    ///
    /// The transport's buffer limit must fit at least a header; limits
    /// beyond what the size field can describe are clamped.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut buffer_size_max = transport.buffer_size_max();
        if buffer_size_max < HEADER_SIZE {
            error!("host: transport buffer size too small ({})", buffer_size_max);
            return Err(Error::InvalidArgument("transport buffer size too small"));
        }
        if buffer_size_max > MESSAGE_SIZE_MAX {
            warn!(
                "host: limiting buffer size to {} (transport offers {})",
                MESSAGE_SIZE_MAX, buffer_size_max
            );
            buffer_size_max = MESSAGE_SIZE_MAX;
        }

        let dispatcher = Dispatcher::new("oplink-completion", config.completion_workers)?;
        info!(
            "host: up (buffer {} bytes, {} completion workers)",
            buffer_size_max, config.completion_workers
        );

        Ok(Self {
            inner: Arc::new(HostInner {
                transport,
                buffer_size_max,
                config,
                dispatcher,
                connections: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakHost {
        WeakHost(Arc::downgrade(&self.inner))
    }

    /// Largest frame, header included.
    pub fn buffer_size_max(&self) -> usize {
        self.inner.buffer_size_max
    }

    /// Largest payload a single message can carry.
    pub fn payload_size_max(&self) -> usize {
        self.inner.buffer_size_max - HEADER_SIZE
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    // ── Connections ─────────────────────────────────────────────

    /// Create a connection on `cport_id`, initially disabled.
    ///
    /// Inbound requests go to `handler`; without one they are answered
    /// with [`Status::ProtocolBad`](super::Status::ProtocolBad).
    pub fn connection_create(
        &self,
        cport_id: u16,
        handler: Option<Arc<dyn ProtocolHandler>>,
    ) -> Result<Connection> {
        let mut connections = self.inner.connections.lock();
        if connections
            .get(&cport_id)
            .is_some_and(|c| c.strong_count() > 0)
        {
            warn!("host: cport {} already has a connection", cport_id);
            return Err(Error::InvalidArgument("cport already in use"));
        }

        let connection = Connection::new(self.clone(), cport_id, handler);
        connections.insert(cport_id, connection.downgrade());
        info!("host: cport {} connection created", cport_id);
        Ok(connection)
    }

    /// Live connection on `cport_id`, if any.
    pub fn connection(&self, cport_id: u16) -> Option<Connection> {
        let inner = self.inner.connections.lock().get(&cport_id)?.upgrade()?;
        Some(Connection::from_inner(inner))
    }

    pub(crate) fn forget_connection(&self, connection: &Connection) {
        let mut connections = self.inner.connections.lock();
        if connections
            .get(&connection.cport_id())
            .is_some_and(|c| connection.is(c))
        {
            connections.remove(&connection.cport_id());
        }
    }

    /// Entry point for inbound bytes from the transport.
    pub fn data_received(&self, cport_id: u16, data: &[u8]) {
        match self.connection(cport_id) {
            Some(connection) => connection.recv(data),
            None => warn!(
                "host: {} bytes for nonexistent cport {}",
                data.len(),
                cport_id
            ),
        }
    }
}

impl core::fmt::Debug for Host {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Host")
            .field("buffer_size_max", &self.inner.buffer_size_max)
            .field("connections", &self.inner.connections.lock().len())
            .finish()
    }
}
