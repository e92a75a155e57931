//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//! - `Corrupted`: A header failed to decode; the stream cannot resynchronize
//!
//! # Example
//!
//! ```
//! use pkg_transport::protocol::{encode_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = encode_frame(2, b"hi").unwrap();
//!
//! buffer.extend(&bytes[..3]);
//! assert!(buffer.try_take_message().unwrap().is_none());
//!
//! buffer.extend(&bytes[3..]);
//! let msg = buffer.try_take_message().unwrap().unwrap();
//! assert_eq!(msg.payload(), b"hi");
//! ```

use bytes::BytesMut;

use super::wire_format::{decode_header, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Message;
use crate::error::{PkgError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header },
    /// A bad header was seen; every later call fails.
    Corrupted { reason: String },
}

/// How much of the next frame has arrived so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialFrame {
    /// Some (possibly zero) bytes of the next header are buffered.
    Header {
        /// Header bytes seen.
        seen: usize,
    },
    /// Header decoded; some payload bytes are buffered.
    Payload {
        /// Decoded header of the frame in progress.
        header: Header,
        /// Payload bytes seen.
        seen: usize,
    },
    /// Stream is corrupted.
    Corrupted,
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Uses a state machine to handle partial reads efficiently.
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 64MB.
    pub fn new() -> Self {
        Self::with_capacity_and_max_payload(64 * 1024, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom capacity and max payload.
    pub fn with_capacity_and_max_payload(capacity: usize, max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Append data to the buffer without extracting messages.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract a single message from the front of the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(msg))` if a complete message was extracted; trailing bytes
    ///   of later frames stay buffered
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation; the buffer stays corrupted
    pub fn try_take_message(&mut self) -> Result<Option<Message>> {
        loop {
            match &self.state {
                State::Corrupted { reason } => {
                    return Err(PkgError::Protocol(format!("stream corrupted: {reason}")));
                }

                State::WaitingForHeader => {
                    // Peek, don't consume yet
                    let header = match decode_header(&self.buffer) {
                        Ok(Some(header)) => header,
                        Ok(None) => return Ok(None),
                        Err(e) => return Err(self.corrupt(e)),
                    };

                    if let Err(e) = header.validate(self.max_payload_size) {
                        return Err(self.corrupt(e));
                    }

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let header = *header;
                    let remaining = header.length as usize;

                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Message::new(header.msg_type, payload)));
                }
            }
        }
    }

    fn corrupt(&mut self, err: PkgError) -> PkgError {
        self.state = State::Corrupted {
            reason: err.to_string(),
        };
        err
    }

    /// Report how much of the next frame has been received.
    pub fn partial(&self) -> PartialFrame {
        match &self.state {
            State::WaitingForHeader => PartialFrame::Header {
                seen: self.buffer.len().min(HEADER_SIZE),
            },
            State::WaitingForPayload { header } => PartialFrame::Payload {
                header: *header,
                seen: self.buffer.len().min(header.length as usize),
            },
            State::Corrupted { .. } => PartialFrame::Corrupted,
        }
    }

    /// True once a bad header has been seen.
    pub fn is_corrupted(&self) -> bool {
        matches!(self.state, State::Corrupted { .. })
    }

    /// Get the number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
