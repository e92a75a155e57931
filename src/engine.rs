//! Transport engine: reading, dispatching and waiting on a [`Connection`].
//!
//! `suckin` pulls whatever bytes are ready, `process` delivers every
//! complete message to the dispatch table, and the blocking waits
//! (`bwaitfor`, `block`, `run_until`) combine the two with awaited reads.
//!
//! # Example
//!
//! ```ignore
//! loop {
//!     match conn.suckin().await? {
//!         ReadOutcome::Closed => break,
//!         _ => {
//!             conn.process()?;
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{Connection, ReadOutcome};
use crate::error::{PkgError, Result};
use crate::handler::HandlerContext;
use crate::protocol::{Message, RESERVED_TYPE};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Pull any bytes that are ready into the inbound buffer.
    ///
    /// "Nothing yet" is [`ReadOutcome::WouldBlock`], not an error. EOF
    /// marks the connection closed; socket errors mark it failed.
    pub async fn suckin(&mut self) -> Result<ReadOutcome> {
        let outcome = self.read_available().await?;
        if let ReadOutcome::Data(n) = outcome {
            tracing::trace!("Read {} bytes from {}", n, self.peer);
        }
        Ok(outcome)
    }

    /// Deliver every complete buffered message to its handler.
    ///
    /// Never waits for the socket. Returns the number of messages
    /// delivered. A handler failure stops the loop with
    /// [`PkgError::HandlerFailed`] and leaves later messages buffered.
    pub fn process(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while let Some(msg) = self.try_take_message()? {
            self.deliver(msg)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn deliver(&mut self, msg: Message) -> Result<()> {
        let msg_type = msg.msg_type;
        self.last_type = Some(msg_type);

        let table = Arc::clone(&self.table);
        let mut failure = None;
        let mut ctx = HandlerContext::new(
            msg_type,
            table.name_of(msg_type),
            self.role,
            &self.peer,
            &mut failure,
        );
        tracing::debug!(
            "Delivering message type {} ({}, {} bytes) from {}",
            msg_type,
            table.name_of(msg_type).unwrap_or("unnamed"),
            msg.len(),
            self.peer
        );
        table.dispatch(msg, &mut ctx);

        match failure {
            Some(reason) => Err(PkgError::HandlerFailed { msg_type, reason }),
            None => Ok(()),
        }
    }

    /// Wait for a message of type `expected` and return it undispatched.
    ///
    /// Messages of other types that arrive first are dispatched as usual.
    /// Returns [`PkgError::ConnectionClosed`] if the peer closes before a
    /// match arrives.
    pub async fn bwaitfor(&mut self, expected: u16) -> Result<Message> {
        if expected == RESERVED_TYPE {
            return Err(PkgError::ReservedType);
        }

        loop {
            while let Some(msg) = self.try_take_message()? {
                if msg.msg_type == expected {
                    self.last_type = Some(expected);
                    return Ok(msg);
                }
                self.deliver(msg)?;
            }

            if self.read_some().await? == ReadOutcome::Closed {
                return Err(PkgError::ConnectionClosed);
            }
        }
    }

    /// Wait until one complete message is buffered, without dispatching it.
    ///
    /// The message is parked until the next `process`, `bwaitfor` or
    /// `try_take_message` call. Returns its type.
    pub async fn block(&mut self) -> Result<u16> {
        loop {
            if self.pending.is_none() {
                self.pending = self.try_take_message()?;
            }
            if let Some(msg) = &self.pending {
                return Ok(msg.msg_type);
            }

            if self.read_some().await? == ReadOutcome::Closed {
                return Err(PkgError::ConnectionClosed);
            }
        }
    }

    /// Dispatch messages until one of type `msg_type` has been delivered.
    ///
    /// Unlike [`bwaitfor`](Self::bwaitfor), the matching message goes to
    /// its handler too. Returns the number of messages delivered.
    pub async fn run_until(&mut self, msg_type: u16) -> Result<usize> {
        if msg_type == RESERVED_TYPE {
            return Err(PkgError::ReservedType);
        }

        let mut delivered = 0;
        loop {
            while let Some(msg) = self.try_take_message()? {
                let done = msg.msg_type == msg_type;
                self.deliver(msg)?;
                delivered += 1;
                if done {
                    return Ok(delivered);
                }
            }

            if self.read_some().await? == ReadOutcome::Closed {
                return Err(PkgError::ConnectionClosed);
            }
        }
    }
}
