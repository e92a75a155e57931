//! NUL-terminated text payloads.
//!
//! HELO, DATA and CIAO payloads are conventionally C strings: the text
//! followed by one NUL byte. Receivers read up to the first NUL and ignore
//! anything after it.
//!
//! # Example
//!
//! ```
//! use pkg_transport::codec::CStrCodec;
//!
//! let payload = CStrCodec::encode("TPKG");
//! assert_eq!(payload, b"TPKG\0");
//! assert_eq!(CStrCodec::decode(&payload).unwrap(), "TPKG");
//! assert_eq!(CStrCodec::decode(b"TPKG\0junk").unwrap(), "TPKG");
//! ```

use std::borrow::Cow;

use crate::error::{PkgError, Result};

/// Codec for NUL-terminated strings.
pub struct CStrCodec;

impl CStrCodec {
    /// Encode text with a trailing NUL.
    ///
    /// Text containing a NUL is truncated there on the receiving side.
    #[inline]
    pub fn encode(text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 1);
        out.extend_from_slice(text.as_bytes());
        out.push(0);
        out
    }

    /// Bytes up to (not including) the first NUL, or the whole slice.
    #[inline]
    pub fn until_nul(bytes: &[u8]) -> &[u8] {
        match bytes.iter().position(|&b| b == 0) {
            Some(end) => &bytes[..end],
            None => bytes,
        }
    }

    /// Decode text up to the first NUL.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the text is not valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<&str> {
        std::str::from_utf8(Self::until_nul(bytes))
            .map_err(|e| PkgError::Protocol(format!("payload is not UTF-8: {e}")))
    }

    /// Decode text up to the first NUL, replacing invalid UTF-8.
    pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
        String::from_utf8_lossy(Self::until_nul(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_nul() {
        assert_eq!(CStrCodec::encode("DONE"), b"DONE\0");
        assert_eq!(CStrCodec::encode(""), b"\0");
    }

    #[test]
    fn test_decode_without_nul() {
        assert_eq!(CStrCodec::decode(b"msg1").unwrap(), "msg1");
    }

    #[test]
    fn test_decode_stops_at_first_nul() {
        assert_eq!(CStrCodec::decode(b"a\0b\0").unwrap(), "a");
        assert_eq!(CStrCodec::decode(b"\0rest").unwrap(), "");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = CStrCodec::decode(b"\xff\xfe\0").unwrap_err();
        assert!(matches!(err, PkgError::Protocol(_)));
        assert_eq!(CStrCodec::decode_lossy(b"ok\xff\0x"), "ok\u{fffd}");
    }
}
