//! In-process loopback transport.
//!
//! ```text
//!  Host A ──send──▶ ┌ tx ring (32 frames) ┐ ──wire thread──▶ Host B::data_received
//!                   └─────────────────────┘        │
//!                                          complete(Ok) back to A
//! ```
//!
//! Each transport carries traffic one way; a pair of them links two
//! hosts. `send` never blocks: a full ring is reported as
//! [`Status::Retry`].

use std::sync::Arc;
use std::thread::JoinHandle;

use heapless::Deque;
use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};

use super::host::{Host, WeakHost};
use super::status::Status;
use super::transport::{OutboundMessage, Transport};
use crate::error::{Error, Result};

/// Frames the wire can hold before `send` pushes back.
pub const TX_RING_DEPTH: usize = 32;

struct Frame {
    cport_id: u16,
    message: OutboundMessage,
}

struct Ring {
    frames: Deque<Frame, TX_RING_DEPTH>,
    running: bool,
}

struct Wire {
    ring: Mutex<Ring>,
    ready: Condvar,
    peer: Mutex<Option<WeakHost>>,
}

/// One-way in-process link into a peer [`Host`].
pub struct LoopbackTransport {
    buffer_size_max: usize,
    wire: Arc<Wire>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    /// Start the wire thread. Frames are dropped until [`connect`] names
    /// a peer.
    ///
    /// [`connect`]: LoopbackTransport::connect
    pub fn new(buffer_size_max: usize) -> Result<Arc<Self>> {
        let wire = Arc::new(Wire {
            ring: Mutex::new(Ring {
                frames: Deque::new(),
                running: true,
            }),
            ready: Condvar::new(),
            peer: Mutex::new(None),
        });

        let thread_wire = Arc::clone(&wire);
        let thread = std::thread::Builder::new()
            .name("oplink-wire".into())
            .spawn(move || wire_loop(&thread_wire))
            .map_err(|e| {
                error!("loopback: spawning wire thread failed: {}", e);
                Error::Config("failed to spawn loopback wire thread")
            })?;

        Ok(Arc::new(Self {
            buffer_size_max,
            wire,
            thread: Some(thread),
        }))
    }

    /// Deliver everything sent from now on into `peer`.
    pub fn connect(&self, peer: &Host) {
        *self.wire.peer.lock() = Some(peer.downgrade());
    }

    /// Frames waiting on the wire.
    pub fn queued(&self) -> usize {
        self.wire.ring.lock().frames.len()
    }
}

impl Transport for LoopbackTransport {
    fn buffer_size_max(&self) -> usize {
        self.buffer_size_max
    }

    fn send(&self, cport_id: u16, message: OutboundMessage) -> core::result::Result<(), Status> {
        let mut ring = self.wire.ring.lock();
        if !ring.running {
            return Err(Status::NotConnected);
        }
        if ring.frames.push_back(Frame { cport_id, message }).is_err() {
            warn!("loopback: tx ring full, cport {}", cport_id);
            return Err(Status::Retry);
        }
        drop(ring);
        self.wire.ready.notify_one();
        Ok(())
    }

    fn cancel(&self, message: &OutboundMessage) {
        let removed = {
            let mut ring = self.wire.ring.lock();
            let mut kept = Deque::<Frame, TX_RING_DEPTH>::new();
            let mut removed = None;
            while let Some(frame) = ring.frames.pop_front() {
                if removed.is_none() && frame.message.is_same(message) {
                    removed = Some(frame);
                } else {
                    // Same capacity; cannot overflow.
                    let _ = kept.push_back(frame);
                }
            }
            ring.frames = kept;
            removed
        };

        match removed {
            Some(frame) => {
                debug!("loopback: cancelled frame on cport {}", frame.cport_id);
                frame.message.complete(Err(Status::Cancelled));
            }
            None => trace!("loopback: cancel of a frame already on the wire"),
        }
    }
}

fn wire_loop(wire: &Wire) {
    loop {
        let frame = {
            let mut ring = wire.ring.lock();
            loop {
                if let Some(frame) = ring.frames.pop_front() {
                    break Some(frame);
                }
                if !ring.running {
                    break None;
                }
                wire.ready.wait(&mut ring);
            }
        };
        let Some(Frame { cport_id, message }) = frame else {
            break;
        };

        let bytes = message.to_bytes();
        message.complete(Ok(()));

        let peer = wire.peer.lock().as_ref().and_then(WeakHost::upgrade);
        match peer {
            Some(peer) => peer.data_received(cport_id, &bytes),
            None => debug!("loopback: no peer, dropped {} bytes on cport {}", bytes.len(), cport_id),
        }
    }
    debug!("loopback: wire thread exiting");
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.wire.ring.lock().running = false;
        self.wire.ready.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                error!("loopback: wire thread panicked");
            }
        }
    }
}
