//! MsgPack codec using `rmp-serde`.
//!
//! Structs are encoded with `to_vec_named`, as maps keyed by field name,
//! so peers can add or reorder fields without breaking each other.
//!
//! # Example
//!
//! ```
//! use pkg_transport::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Report {
//!     region: String,
//!     volume: f64,
//! }
//!
//! let report = Report { region: "hull".to_string(), volume: 12.5 };
//! let encoded = MsgPackCodec::encode(&report).unwrap();
//! let decoded: Report = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, report);
//! ```

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (structs as maps).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
