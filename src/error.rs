//! Error types for pkg-transport.

use thiserror::Error;

/// Main error type for all PKG operations.
#[derive(Debug, Error)]
pub enum PkgError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (corrupt frame, unexpected message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame header did not start with the PKG magic number.
    #[error("Bad header magic 0x{found:04x}")]
    BadMagic {
        /// Magic value actually found on the wire.
        found: u16,
    },

    /// Payload length exceeds what the frame or the connection allows.
    #[error("Payload size {length} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared or requested payload length.
        length: u64,
        /// Applicable limit.
        max: u64,
    },

    /// Endpoint string that names neither a port, an address nor a Unix path.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Attempt to encode a frame with the reserved message type 0.
    #[error("Message type 0 is reserved")]
    ReservedType,

    /// Peer did not complete the handshake correctly.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A dispatch handler reported a failure through its context.
    #[error("Handler for message type {msg_type} failed: {reason}")]
    HandlerFailed {
        /// Type of the message being handled.
        msg_type: u16,
        /// Reason recorded by the handler.
        reason: String,
    },

    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection was marked failed by an earlier error.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Listener hit a fatal error and accepts no more connections.
    #[error("Listener closed")]
    ListenerClosed,

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Coarse classification of errors, used to decide who recovers from what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed traffic or failed handshake; discard the one connection.
    Protocol,
    /// Socket-level failure; fatal to the affected connection or listener.
    Transport,
    /// Contract violation by the caller.
    Programmer,
}

impl PkgError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PkgError::Io(_)
            | PkgError::ConnectionClosed
            | PkgError::ConnectionFailed(_)
            | PkgError::ListenerClosed => ErrorClass::Transport,
            PkgError::ReservedType | PkgError::InvalidEndpoint(_) => ErrorClass::Programmer,
            PkgError::Protocol(_)
            | PkgError::BadMagic { .. }
            | PkgError::PayloadTooLarge { .. }
            | PkgError::HandshakeRejected(_)
            | PkgError::HandlerFailed { .. }
            | PkgError::MsgPackEncode(_)
            | PkgError::MsgPackDecode(_) => ErrorClass::Protocol,
        }
    }

    /// True when the error means the peer has gone away.
    pub fn is_closed(&self) -> bool {
        matches!(self, PkgError::ConnectionClosed)
    }
}

/// Result type alias using PkgError.
pub type Result<T> = std::result::Result<T, PkgError>;
