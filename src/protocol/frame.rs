//! Message struct and frame encoding.
//!
//! A [`Message`] is one complete, typed unit received from or sent to a
//! peer. Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use pkg_transport::protocol::{encode_frame, Message, HEADER_SIZE};
//!
//! let bytes = encode_frame(2, b"hello").unwrap();
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//!
//! let msg = Message::from_slice(2, b"hello");
//! assert_eq!(msg.msg_type(), 2);
//! assert_eq!(msg.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{outbound_header, Header, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub msg_type: u16,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Message {
    /// Create a new message from type and payload.
    pub fn new(msg_type: u16, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }

    /// Create a message from raw bytes (copies data).
    pub fn from_slice(msg_type: u16, payload: &[u8]) -> Self {
        Self {
            msg_type,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get the message type.
    #[inline]
    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Encode this message as a contiguous frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.msg_type, &self.payload)
    }
}

/// Encode a complete frame as a single byte vector: header then payload,
/// no padding.
///
/// Fails with [`PkgError::ReservedType`](crate::PkgError::ReservedType) for
/// type 0.
pub fn encode_frame(msg_type: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let header = outbound_header(msg_type, payload.len())?;
    Ok(build_frame(&header, payload))
}

/// Build a frame from an already validated header.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Build frame parts for scatter/gather I/O.
///
/// Returns the encoded header and a reference to the payload.
pub fn build_frame_parts<'a>(header: &Header, payload: &'a [u8]) -> ([u8; HEADER_SIZE], &'a [u8]) {
    (header.encode(), payload)
}

/// Extract a payload of `length` bytes from the front of `buf`.
///
/// Returns `None` if fewer than `length` bytes are available.
pub fn decode_payload(buf: &[u8], length: u32) -> Option<Bytes> {
    let length = length as usize;
    if buf.len() < length {
        return None;
    }
    Some(Bytes::copy_from_slice(&buf[..length]))
}
