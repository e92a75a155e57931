//! # pkg-transport
//!
//! Typed-message socket transport for cooperating tool processes.
//!
//! A permanent server accepts clients over TCP or Unix-domain sockets and
//! exchanges discrete typed messages with them. Every message travels as
//! an 8-byte header followed by its payload:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────┐
//! │ Magic    │ Type     │ Length   │ Payload         │
//! │ 0x41FE   │ u16 BE   │ u32 BE   │ Length bytes    │
//! └──────────┴──────────┴──────────┴─────────────────┘
//! ```
//!
//! ## Architecture
//!
//! - **Connection**: one socket, its inbound frame buffer and session state
//! - **Engine**: `suckin` / `process` / `bwaitfor` on a connection
//! - **Dispatch table**: message type to handler, with a default slot
//! - **Server**: listener, HELO handshake and concurrent sessions
//!
//! ## Example
//!
//! ```ignore
//! use pkg_transport::{DispatchTable, Server, ServerConfig, MSG_CIAO};
//!
//! #[tokio::main]
//! async fn main() -> pkg_transport::Result<()> {
//!     let mut server = Server::bind(ServerConfig::default(), DispatchTable::new()).await?;
//!     let mut conn = server.accept_client().await?;
//!
//!     conn.send_data("This is a message from the server.").await?;
//!     conn.terminate("DONE").await?;
//!     conn.close().await
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod engine;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

mod client;
mod writer;

pub use client::ClientBuilder;
pub use connection::{Connection, ConnectionConfig, ReadOutcome, Role, SessionPhase};
pub use error::{ErrorClass, PkgError, Result};
pub use handler::{DispatchTable, HandlerContext};
pub use protocol::Message;
pub use server::{Server, ServerConfig, Step};
pub use session::{DEFAULT_PORT, MAGIC_ID, MSG_CIAO, MSG_DATA, MSG_HELO};
pub use transport::Endpoint;
