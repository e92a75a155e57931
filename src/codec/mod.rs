//! Payload codecs.
//!
//! The transport treats payloads as opaque bytes. These helpers cover the
//! two conventions used on top of it:
//!
//! - [`CStrCodec`] - NUL-terminated text (HELO magic, DATA text, CIAO reason)
//! - [`MsgPackCodec`] - structured values using `rmp-serde`
//!
//! Codecs are marker structs with static methods, not trait objects.
//!
//! # Example
//!
//! ```
//! use pkg_transport::codec::{CStrCodec, MsgPackCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let text = CStrCodec::encode("DONE");
//! assert_eq!(CStrCodec::decode(&text).unwrap(), "DONE");
//! ```

mod cstr;
mod msgpack;

pub use cstr::CStrCodec;
pub use msgpack::MsgPackCodec;
