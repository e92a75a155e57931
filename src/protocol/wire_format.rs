//! Wire format encoding and decoding.
//!
//! Implements the 8-byte PKG header:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Magic    │ Type     │ Length   │
//! │ 2 bytes  │ 2 bytes  │ 4 bytes  │
//! │ uint16 BE│ uint16 BE│ uint32 BE│
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{PkgError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Magic number opening every frame header.
pub const PKG_MAGIC: u16 = 0x41FE;

/// Reserved message type (never sent; selects the default handler in a table).
pub const RESERVED_TYPE: u16 = 0;

/// Default maximum inbound payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type (1-65535, 0 reserved).
    pub msg_type: u16,
    /// Payload length in bytes.
    pub length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(msg_type: u16, length: u32) -> Self {
        Self { msg_type, length }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use pkg_transport::protocol::{Header, HEADER_SIZE};
    ///
    /// let bytes = Header::new(2, 100).encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[..2], &[0x41, 0xFE]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&PKG_MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if the buffer is too short, and an error if the
    /// magic number does not match.
    ///
    /// # Example
    ///
    /// ```
    /// use pkg_transport::protocol::Header;
    ///
    /// let bytes = [0x41, 0xFE, 0, 3, 0, 0, 0, 5];
    /// let header = Header::decode(&bytes).unwrap().unwrap();
    /// assert_eq!(header.msg_type, 3);
    /// assert_eq!(header.length, 5);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != PKG_MAGIC {
            return Err(PkgError::BadMagic { found: magic });
        }
        Ok(Some(Self {
            msg_type: u16::from_be_bytes([buf[2], buf[3]]),
            length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }))
    }

    /// Validate an inbound header.
    ///
    /// Checks:
    /// - Message type is not 0 (reserved)
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.msg_type == RESERVED_TYPE {
            return Err(PkgError::Protocol(
                "Message type 0 is reserved".to_string(),
            ));
        }

        if self.length > max_payload_size {
            return Err(PkgError::PayloadTooLarge {
                length: self.length as u64,
                max: max_payload_size as u64,
            });
        }

        Ok(())
    }
}

/// Build the header for an outbound message of `payload_len` bytes.
///
/// Rejects the reserved type and payloads that do not fit the length field.
pub fn outbound_header(msg_type: u16, payload_len: usize) -> Result<Header> {
    if msg_type == RESERVED_TYPE {
        return Err(PkgError::ReservedType);
    }
    let length = u32::try_from(payload_len).map_err(|_| PkgError::PayloadTooLarge {
        length: payload_len as u64,
        max: u32::MAX as u64,
    })?;
    Ok(Header::new(msg_type, length))
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<Option<Header>> {
    Header::decode(buf)
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}
