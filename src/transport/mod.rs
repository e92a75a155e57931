//! Transport module - sockets and listeners.
//!
//! Provides abstraction over:
//! - TCP sockets (all platforms)
//! - Unix Domain Sockets (Linux/macOS)

mod listener;
mod socket;

pub use listener::{AcceptOutcome, Listener, ListenerState};
pub use socket::{Endpoint, Stream};
