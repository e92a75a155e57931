//! Endpoints and connected streams.
//!
//! - TCP on every platform
//! - Unix Domain Socket on Unix
//!
//! # Example
//!
//! ```
//! use pkg_transport::transport::Endpoint;
//!
//! let endpoint: Endpoint = "127.0.0.1:2000".parse().unwrap();
//! assert_eq!(endpoint.to_string(), "127.0.0.1:2000");
//!
//! let any: Endpoint = "2000".parse().unwrap();
//! assert_eq!(any, Endpoint::tcp_port(2000));
//! ```

use std::fmt;
use std::io::IoSlice;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{PkgError, Result};

/// Where a listener binds or a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket address. Port 0 asks the OS for an ephemeral port.
    Tcp(SocketAddr),
    /// Unix Domain Socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// TCP endpoint on all interfaces.
    pub fn tcp_port(port: u16) -> Self {
        Endpoint::Tcp(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// TCP endpoint on the loopback interface.
    pub fn localhost(port: u16) -> Self {
        Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Port number, for TCP endpoints.
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Tcp(addr) => Some(addr.port()),
            #[cfg(unix)]
            Endpoint::Unix(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = PkgError;

    /// Accepts `unix:<path>`, `<ip>:<port>`, or a bare port number.
    fn from_str(s: &str) -> Result<Self> {
        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Endpoint::Tcp(addr));
        }

        s.parse::<u16>()
            .map(Endpoint::tcp_port)
            .map_err(|_| PkgError::InvalidEndpoint(s.to_string()))
    }
}

/// A connected byte stream.
#[derive(Debug)]
pub enum Stream {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix Domain Socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Connect to an endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Could not set TCP_NODELAY on {}: {}", addr, e);
                }
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path).await?)),
        }
    }

    /// Best-effort description of the remote end.
    pub fn peer_name(&self) -> String {
        match self {
            Stream::Tcp(s) => s
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:unknown".to_string()),
            #[cfg(unix)]
            Stream::Unix(s) => s
                .peer_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| format!("unix:{}", p.display())))
                .unwrap_or_else(|| "unix:unnamed".to_string()),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Stream::Tcp(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
