//! Client builder.
//!
//! The [`ClientBuilder`] collects handlers and settings, then connects to a
//! server and performs the HELO greeting:
//! 1. Connect the socket (optionally bounded by a timeout)
//! 2. Install the dispatch table
//! 3. Send HELO with the magic identifier
//!
//! # Example
//!
//! ```ignore
//! use pkg_transport::{ClientBuilder, Endpoint, MSG_CIAO, MSG_DATA};
//! use pkg_transport::codec::CStrCodec;
//!
//! let mut conn = ClientBuilder::new()
//!     .on(MSG_DATA, "DATA", |_ctx, payload| {
//!         println!("{}", CStrCodec::decode_lossy(&payload));
//!     })
//!     .connect(&Endpoint::localhost(2000))
//!     .await?;
//!
//! let ciao = conn.bwaitfor(MSG_CIAO).await?;
//! conn.acknowledge_termination("DONE").await?;
//! conn.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::connection::{Connection, ConnectionConfig, Role};
use crate::error::{PkgError, Result};
use crate::handler::{DispatchTable, HandlerContext};
use crate::session::MAGIC_ID;
use crate::transport::{Endpoint, Stream};

/// Builder for client connections.
pub struct ClientBuilder {
    table: DispatchTable,
    shared: Option<Arc<DispatchTable>>,
    magic: String,
    config: ConnectionConfig,
    connect_timeout: Option<Duration>,
    handshake: bool,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            table: DispatchTable::new(),
            shared: None,
            magic: MAGIC_ID.to_string(),
            config: ConnectionConfig::default(),
            connect_timeout: None,
            handshake: true,
        }
    }

    /// Register a handler for a message type.
    pub fn on<F>(mut self, msg_type: u16, name: &str, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
    {
        self.table.register(msg_type, name, handler);
        self
    }

    /// Register a handler that receives a MsgPack-decoded value.
    pub fn on_msgpack<F, T>(mut self, msg_type: u16, name: &str, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, T) + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.table = self.table.on_msgpack(msg_type, name, handler);
        self
    }

    /// Install the handler for types with no specific handler.
    pub fn default_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
    {
        self.table = self.table.default_handler(handler);
        self
    }

    /// Use an existing shared table instead of the handlers registered here.
    pub fn with_table(mut self, table: Arc<DispatchTable>) -> Self {
        self.shared = Some(table);
        self
    }

    /// Set the magic identifier sent in HELO.
    ///
    /// Default: `"TPKG"`
    pub fn magic(mut self, magic: impl Into<String>) -> Self {
        self.magic = magic.into();
        self
    }

    /// Set the connection configuration.
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound the socket connect.
    ///
    /// Default: no limit
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Whether `connect` sends HELO. Default: true
    pub fn handshake(mut self, enabled: bool) -> Self {
        self.handshake = enabled;
        self
    }

    /// Connect to a server and greet it.
    pub async fn connect(self, endpoint: &Endpoint) -> Result<Connection> {
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, Stream::connect(endpoint))
                .await
                .map_err(|_| {
                    PkgError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {endpoint} timed out"),
                    ))
                })??,
            None => Stream::connect(endpoint).await?,
        };

        let table = match self.shared {
            Some(table) => table,
            None => Arc::new(self.table),
        };
        let mut conn =
            Connection::with_config(stream, Role::Client, endpoint.to_string(), table, self.config);

        if self.handshake {
            conn.hello(&self.magic).await?;
        }
        tracing::info!("Connected to {}", endpoint);
        Ok(conn)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("table", &self.table)
            .field("shared", &self.shared.is_some())
            .field("magic", &self.magic)
            .field("handshake", &self.handshake)
            .finish()
    }
}
