//! Session protocol: greeting, data and termination messages.
//!
//! ```text
//! client                      server
//!   | ---- HELO "TPKG\0" ------> |   handshake
//!   | <--- DATA ... ------------ |
//!   | <--- CIAO "DONE\0" ------- |   terminate
//!   | ---- CIAO "DONE\0" ------> |   acknowledge
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{CStrCodec, MsgPackCodec};
use crate::connection::{Connection, SessionPhase};
use crate::error::{PkgError, Result};
use crate::protocol::Message;

/// Handshake message; payload is the magic identifier.
pub const MSG_HELO: u16 = 1;
/// Application data.
pub const MSG_DATA: u16 = 2;
/// Orderly termination; payload is a short reason.
pub const MSG_CIAO: u16 = 3;

/// Magic identifier sent in HELO.
pub const MAGIC_ID: &str = "TPKG";

/// Well-known server port.
pub const DEFAULT_PORT: u16 = 2000;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Greet the server with `magic` and mark the session established.
    pub async fn hello(&mut self, magic: &str) -> Result<()> {
        self.send(MSG_HELO, &CStrCodec::encode(magic)).await?;
        self.phase = SessionPhase::Established;
        Ok(())
    }

    /// Wait for the client's HELO and check its magic.
    ///
    /// Anything the client sends before HELO is dispatched normally. The
    /// wait is bounded by `limit` when given.
    pub async fn expect_hello(&mut self, magic: &str, limit: Option<Duration>) -> Result<()> {
        let msg = match limit {
            Some(limit) => tokio::time::timeout(limit, self.bwaitfor(MSG_HELO))
                .await
                .map_err(|_| {
                    PkgError::HandshakeRejected(format!("no HELO within {}ms", limit.as_millis()))
                })??,
            None => self.bwaitfor(MSG_HELO).await?,
        };

        let found = CStrCodec::decode_lossy(msg.payload());
        if found != magic {
            return Err(PkgError::HandshakeRejected(format!(
                "magic mismatch: expected {magic:?}, got {found:?}"
            )));
        }

        self.phase = SessionPhase::Established;
        Ok(())
    }

    /// Send text as a NUL-terminated payload.
    pub async fn send_text(&mut self, msg_type: u16, text: &str) -> Result<usize> {
        self.send(msg_type, &CStrCodec::encode(text)).await
    }

    /// Send a DATA message carrying text.
    pub async fn send_data(&mut self, text: &str) -> Result<usize> {
        self.send_text(MSG_DATA, text).await
    }

    /// Send a MsgPack-encoded value.
    pub async fn send_msgpack<T: Serialize>(&mut self, msg_type: u16, value: &T) -> Result<usize> {
        let payload = MsgPackCodec::encode(value)?;
        self.send(msg_type, &payload).await
    }

    /// Send CIAO and wait for the peer's CIAO in reply.
    ///
    /// Messages arriving before the reply are dispatched. Returns the reply.
    pub async fn terminate(&mut self, reason: &str) -> Result<Message> {
        self.send_text(MSG_CIAO, reason).await?;
        self.phase = SessionPhase::Closing;
        tracing::debug!("Sent CIAO to {}, waiting for reply", self.peer);
        self.bwaitfor(MSG_CIAO).await
    }

    /// Reply to a CIAO received from the peer.
    pub async fn acknowledge_termination(&mut self, reason: &str) -> Result<()> {
        self.send_text(MSG_CIAO, reason).await?;
        self.phase = SessionPhase::Closing;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;
    use crate::handler::DispatchTable;
    use crate::protocol::encode_frame;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn pair(role: Role) -> (Connection<DuplexStream>, DuplexStream) {
        let (ours, theirs) = duplex(4096);
        (Connection::new(ours, role, "peer", Arc::new(DispatchTable::new())), theirs)
    }

    #[tokio::test]
    async fn test_hello_sends_magic_with_nul() {
        let (mut conn, mut peer) = pair(Role::Client);
        conn.hello(MAGIC_ID).await.unwrap();
        assert_eq!(conn.phase(), SessionPhase::Established);

        let mut buf = vec![0u8; 8 + 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, encode_frame(MSG_HELO, b"TPKG\0").unwrap());
    }

    #[tokio::test]
    async fn test_expect_hello_accepts_matching_magic() {
        let (mut conn, mut peer) = pair(Role::Server);
        peer.write_all(&encode_frame(MSG_HELO, b"TPKG\0").unwrap()).await.unwrap();

        conn.expect_hello(MAGIC_ID, None).await.unwrap();
        assert_eq!(conn.phase(), SessionPhase::Established);
        assert_eq!(conn.last_type(), Some(MSG_HELO));
    }

    #[tokio::test]
    async fn test_expect_hello_rejects_wrong_magic() {
        let (mut conn, mut peer) = pair(Role::Server);
        peer.write_all(&encode_frame(MSG_HELO, b"XXXX\0").unwrap()).await.unwrap();

        let err = conn.expect_hello(MAGIC_ID, None).await.unwrap_err();
        assert!(matches!(err, PkgError::HandshakeRejected(_)));
        assert_eq!(conn.phase(), SessionPhase::AwaitingHandshake);
    }

    #[tokio::test]
    async fn test_expect_hello_times_out() {
        let (mut conn, _peer) = pair(Role::Server);
        let err = conn
            .expect_hello(MAGIC_ID, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, PkgError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn test_terminate_waits_for_reply() {
        let (mut conn, mut peer) = pair(Role::Server);

        let echo = tokio::spawn(async move {
            let mut buf = vec![0u8; 8 + 5];
            peer.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, encode_frame(MSG_CIAO, b"DONE\0").unwrap());
            peer.write_all(&buf).await.unwrap();
            peer
        });

        let reply = conn.terminate("DONE").await.unwrap();
        assert_eq!(CStrCodec::decode(reply.payload()).unwrap(), "DONE");
        assert_eq!(conn.phase(), SessionPhase::Closing);
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_msgpack() {
        let (mut conn, mut peer) = pair(Role::Client);
        conn.send_msgpack(MSG_DATA, &(1u8, 2u8)).await.unwrap();

        let mut buf = vec![0u8; 8 + 3];
        peer.read_exact(&mut buf).await.unwrap();
        let decoded: (u8, u8) = MsgPackCodec::decode(&buf[8..]).unwrap();
        assert_eq!(decoded, (1, 2));
    }
}
