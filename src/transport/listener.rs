//! Listening socket with single-attempt accepts.
//!
//! Each call to [`Listener::accept`] is one bounded attempt. "Nothing
//! pending yet" is reported as [`AcceptOutcome::Busy`], never as an error;
//! only fatal socket errors are returned, and they close the listener.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use pkg_transport::transport::{AcceptOutcome, Endpoint, Listener};
//!
//! let mut listener = Listener::open(&Endpoint::localhost(0)).await?;
//! loop {
//!     match listener.accept(Duration::from_millis(100)).await? {
//!         AcceptOutcome::Accepted { stream, peer } => break,
//!         AcceptOutcome::Busy => continue,
//!     }
//! }
//! ```

use std::io;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use super::{Endpoint, Stream};
use crate::error::{PkgError, Result};

/// Result of one accept attempt.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// A client connected.
    Accepted {
        /// The connected stream.
        stream: Stream,
        /// Description of the remote end.
        peer: String,
    },
    /// No connection was ready; try again later.
    Busy,
}

/// Listener status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Bound and accepting.
    Listening,
    /// A fatal error occurred; no further accepts.
    Closed,
}

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

/// Listening socket for PKG servers.
pub struct Listener {
    inner: Inner,
    endpoint: Endpoint,
    state: ListenerState,
}

impl Listener {
    /// Bind and listen on an endpoint.
    ///
    /// For TCP, port 0 binds an ephemeral port; [`local_endpoint`](Self::local_endpoint)
    /// reports the one chosen. For Unix sockets, a stale socket file at the
    /// path is removed first, and the file is removed again on drop.
    pub async fn open(endpoint: &Endpoint) -> Result<Self> {
        let (inner, endpoint) = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let bound = Endpoint::Tcp(listener.local_addr()?);
                (Inner::Tcp(listener), bound)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if Path::new(path).exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                (
                    Inner::Unix {
                        listener,
                        path: path.clone(),
                    },
                    endpoint.clone(),
                )
            }
        };

        tracing::info!("Listening on {}", endpoint);

        Ok(Self {
            inner,
            endpoint,
            state: ListenerState::Listening,
        })
    }

    /// The endpoint actually bound.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current listener status.
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Make one accept attempt, waiting at most `wait`.
    ///
    /// A zero `wait` only picks up a connection that is already queued.
    pub async fn accept(&mut self, wait: Duration) -> Result<AcceptOutcome> {
        if self.state == ListenerState::Closed {
            return Err(PkgError::ListenerClosed);
        }

        let attempt = match &self.inner {
            Inner::Tcp(listener) => tokio::time::timeout(wait, listener.accept())
                .await
                .map(|r| {
                    r.map(|(stream, addr)| {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                        }
                        (Stream::Tcp(stream), addr.to_string())
                    })
                }),
            #[cfg(unix)]
            Inner::Unix { listener, path } => tokio::time::timeout(wait, listener.accept())
                .await
                .map(|r| {
                    r.map(|(stream, _addr)| {
                        (Stream::Unix(stream), format!("unix:{}", path.display()))
                    })
                }),
        };

        match attempt {
            Err(_elapsed) => Ok(AcceptOutcome::Busy),
            Ok(Ok((stream, peer))) => {
                tracing::debug!("Accepted connection from {}", peer);
                Ok(AcceptOutcome::Accepted { stream, peer })
            }
            Ok(Err(e)) if is_transient(&e) => {
                tracing::warn!("Transient accept error on {}: {}", self.endpoint, e);
                Ok(AcceptOutcome::Busy)
            }
            Ok(Err(e)) => {
                tracing::error!("Fatal accept error on {}: {}", self.endpoint, e);
                self.state = ListenerState::Closed;
                Err(PkgError::Io(e))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Inner::Unix { path, .. } = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

/// Errors that concern one incoming connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
