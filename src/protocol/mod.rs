//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the PKG framing:
//! - 8-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Message struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, decode_payload, encode_frame, Message};
pub use frame_buffer::{FrameBuffer, PartialFrame};
pub use wire_format::{
    decode_header, encode_header, outbound_header, Header, DEFAULT_MAX_PAYLOAD_SIZE,
    HEADER_SIZE, PKG_MAGIC, RESERVED_TYPE,
};
