//! Framed message buffers.
//!
//! A message is one allocation holding header and payload back to back.
//! Its length is fixed when it is allocated; only the contents change
//! (the operation id and result bytes at send time, the whole frame when
//! a response lands).

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::header::{HEADER_SIZE, Header};
use super::status::Status;
use crate::error::{Error, Result};

/// One request or response buffer.
pub struct Message {
    buffer: Mutex<Box<[u8]>>,
}

impl Message {
    /// Allocate a zeroed message with room for `payload_size` payload bytes.
    ///
    /// Messages larger than `size_max` are refused before any allocation.
    /// The caller writes the header with [`Message::write_header`].
    pub(crate) fn alloc(payload_size: usize, size_max: usize) -> Result<Self> {
        let size = HEADER_SIZE.saturating_add(payload_size);
        if size > size_max {
            log::warn!("message: requested size too big ({} > {})", size, size_max);
            return Err(Error::MessageTooLarge { size, max: size_max });
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| Error::Status(Status::NoMemory))?;
        buffer.resize(size, 0);

        Ok(Self {
            buffer: Mutex::new(buffer.into_boxed_slice()),
        })
    }

    /// Copy an inbound frame verbatim.
    pub(crate) fn from_frame(frame: &[u8], size_max: usize) -> Result<Self> {
        if frame.len() > size_max {
            return Err(Error::MessageTooLarge {
                size: frame.len(),
                max: size_max,
            });
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(frame.len())
            .map_err(|_| Error::Status(Status::NoMemory))?;
        buffer.extend_from_slice(frame);
        Ok(Self {
            buffer: Mutex::new(buffer.into_boxed_slice()),
        })
    }

    /// Total length, header included.
    pub fn size(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn payload_size(&self) -> usize {
        self.size() - HEADER_SIZE
    }

    /// Current header contents.
    pub fn header(&self) -> Header {
        // Every buffer is at least HEADER_SIZE long.
        Header::decode(&self.buffer.lock()).unwrap_or_default()
    }

    /// Payload bytes, locked for reading or writing.
    ///
    /// The guard holds the message lock; drop it before calling any other
    /// accessor on the same message.
    pub fn payload(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.buffer.lock(), |buf| &mut buf[HEADER_SIZE..])
    }

    /// Snapshot of the whole frame as it would go on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.lock().to_vec()
    }

    pub(crate) fn write_header(&self, header: &Header) {
        let _ = header.encode(&mut self.buffer.lock());
    }

    pub(crate) fn set_operation_id(&self, id: u16) {
        self.buffer.lock()[2..4].copy_from_slice(&id.to_le_bytes());
    }

    pub(crate) fn set_result(&self, code: u8) {
        self.buffer.lock()[5] = code;
    }

    /// Overwrite the front of the buffer with `frame`. Returns bytes copied.
    pub(crate) fn fill(&self, frame: &[u8]) -> usize {
        let mut buf = self.buffer.lock();
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        n
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header())
            .field("size", &self.size())
            .finish()
    }
}
