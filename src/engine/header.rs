//! Operation message header codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────┬──────┬────────┬───────────────────┐
//! │ Size (2B)  │ Op id (2B)   │ Type │ Result │ Payload (N B)     │
//! │ LE u16     │ LE u16       │ (1B) │ (1B)   │                   │
//! └────────────┴──────────────┴──────┴────────┴───────────────────┘
//! ```
//!
//! `Size` counts the header itself. Bit 7 of `Type` marks a response;
//! the low seven bits are the protocol's operation type. `Result` is
//! always zero in a request.

/// Header size in bytes.
pub const HEADER_SIZE: usize = 6;

/// Largest message the 16-bit size field can describe.
pub const MESSAGE_SIZE_MAX: usize = u16::MAX as usize;

/// Response flag in the type byte.
pub const TYPE_RESPONSE: u8 = 0x80;

/// Reserved operation type; never valid for a request.
pub const TYPE_INVALID: u8 = 0x00;

/// Decoded message header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Total message length, header included.
    pub size: u16,
    pub operation_id: u16,
    /// Raw type byte, response flag included.
    pub message_type: u8,
    /// Wire status code.
    pub result: u8,
}

/// Size field for `payload_size` payload bytes, saturating at the
/// largest describable message.
fn size_field(payload_size: usize) -> u16 {
    HEADER_SIZE
        .saturating_add(payload_size)
        .min(MESSAGE_SIZE_MAX) as u16
}

impl Header {
    /// Header for an outbound request. The id is filled in at send time.
    pub fn request(operation_type: u8, payload_size: usize) -> Self {
        Self {
            size: size_field(payload_size),
            operation_id: 0,
            message_type: operation_type & !TYPE_RESPONSE,
            result: 0,
        }
    }

    /// Header for a response to `request`.
    pub fn response_to(request: &Header, payload_size: usize, result: u8) -> Self {
        Self {
            size: size_field(payload_size),
            operation_id: request.operation_id,
            message_type: request.message_type | TYPE_RESPONSE,
            result,
        }
    }

    /// Decode the header at the front of `data`.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are present.
    /// The declared size is not checked against `data`; see
    /// [`Header::frame_len`].
    pub fn decode(data: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_SIZE] = data.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            size: u16::from_le_bytes([raw[0], raw[1]]),
            operation_id: u16::from_le_bytes([raw[2], raw[3]]),
            message_type: raw[4],
            result: raw[5],
        })
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `out`.
    ///
    /// Returns the number of bytes written, or `None` if `out` is too short.
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let dst = out.get_mut(..HEADER_SIZE)?;
        dst[0..2].copy_from_slice(&self.size.to_le_bytes());
        dst[2..4].copy_from_slice(&self.operation_id.to_le_bytes());
        dst[4] = self.message_type;
        dst[5] = self.result;
        Some(HEADER_SIZE)
    }

    pub const fn is_response(&self) -> bool {
        self.message_type & TYPE_RESPONSE != 0
    }

    /// Operation type with the response flag stripped.
    pub const fn operation_type(&self) -> u8 {
        self.message_type & !TYPE_RESPONSE
    }

    pub const fn payload_size(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Validate the declared size against the `available` received bytes.
    ///
    /// Returns the frame length to consume, or `None` for a frame that is
    /// truncated or declares a size smaller than its own header.
    pub const fn frame_len(&self, available: usize) -> Option<usize> {
        let size = self.size as usize;
        if size < HEADER_SIZE || size > available {
            None
        } else {
            Some(size)
        }
    }
}

/// Build a complete frame (header + payload).
pub fn encode_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_SIZE + payload.len()];
    let _ = header.encode(&mut out);
    out[HEADER_SIZE..].copy_from_slice(payload);
    out
}
