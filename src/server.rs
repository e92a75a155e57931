//! Permanent server: accept loop, handshake and concurrent sessions.
//!
//! [`Server::step`] makes one pass of the lifecycle (accept attempt, HELO
//! wait, magic check). [`Server::accept_client`] repeats it with bounded
//! exponential backoff until a client is established, and
//! [`Server::serve_until`] gives every accepted client its own task, which
//! runs the handshake and then the session.
//!
//! # Example
//!
//! ```ignore
//! use pkg_transport::{DispatchTable, Server, ServerConfig, MSG_DATA};
//!
//! let table = DispatchTable::new().on(MSG_DATA, "DATA", |_ctx, payload| {
//!     println!("{} bytes", payload.len());
//! });
//! let mut server = Server::bind(ServerConfig::default(), table).await?;
//! let mut conn = server.accept_client().await?;
//! conn.send_data("hello").await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::connection::{Connection, ConnectionConfig, Role};
use crate::error::{PkgError, Result};
use crate::handler::DispatchTable;
use crate::session::{DEFAULT_PORT, MAGIC_ID};
use crate::transport::{AcceptOutcome, Endpoint, Listener, ListenerState, Stream};

/// Default limit on waiting for a client's HELO.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default first backoff delay after a busy accept.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(50);

/// Default backoff ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Default time one accept attempt waits for a client.
pub const DEFAULT_ACCEPT_WAIT: Duration = Duration::from_millis(250);

/// Default limit on concurrently running sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where to listen.
    pub endpoint: Endpoint,
    /// Magic identifier clients must send in HELO.
    pub magic: String,
    /// Limit on the HELO wait; `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// First delay after a busy accept attempt.
    pub backoff_initial: Duration,
    /// Upper bound for the backoff delay.
    pub backoff_max: Duration,
    /// How long a single accept attempt waits.
    pub accept_wait: Duration,
    /// Sessions allowed to run at once in `serve_until`.
    pub max_sessions: usize,
    /// Settings for accepted connections.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::tcp_port(DEFAULT_PORT),
            magic: MAGIC_ID.to_string(),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            accept_wait: DEFAULT_ACCEPT_WAIT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Set the magic identifier.
    pub fn magic(mut self, magic: impl Into<String>) -> Self {
        self.magic = magic.into();
        self
    }

    /// Set the handshake timeout. `None` disables it.
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the backoff range used between busy accept attempts.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max.max(initial);
        self
    }

    /// Set how long one accept attempt waits.
    pub fn accept_wait(mut self, wait: Duration) -> Self {
        self.accept_wait = wait;
        self
    }

    /// Set the concurrent session limit.
    ///
    /// Clamped to at least 1 and to what the session semaphore can hold.
    pub fn max_sessions(mut self, limit: usize) -> Self {
        self.max_sessions = session_limit(limit) as usize;
        self
    }

    /// Set the configuration applied to accepted connections.
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }
}

/// Result of one server step.
#[derive(Debug)]
pub enum Step {
    /// No client was ready.
    Busy,
    /// A client connected but failed the handshake; its connection is closed.
    Rejected {
        /// Peer that was turned away.
        peer: String,
        /// Why.
        reason: String,
    },
    /// A client completed the handshake.
    Established(Connection),
}

/// A PKG server bound to one endpoint.
#[derive(Debug)]
pub struct Server {
    listener: Listener,
    config: ServerConfig,
    table: Arc<DispatchTable>,
}

impl Server {
    /// Bind the configured endpoint.
    ///
    /// `table` is installed on every accepted connection.
    pub async fn bind(config: ServerConfig, table: impl Into<Arc<DispatchTable>>) -> Result<Self> {
        let listener = Listener::open(&config.endpoint).await?;
        Ok(Self {
            listener,
            config,
            table: table.into(),
        })
    }

    /// The endpoint actually bound (with the real port for port 0).
    pub fn local_endpoint(&self) -> &Endpoint {
        self.listener.local_endpoint()
    }

    /// Listener status.
    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// One pass: accept attempt, HELO wait, magic check.
    ///
    /// Only fatal listener errors are returned as `Err`. A client that
    /// fails the handshake for any reason is closed and reported as
    /// [`Step::Rejected`].
    pub async fn step(&mut self) -> Result<Step> {
        match self.listener.accept(self.config.accept_wait).await? {
            AcceptOutcome::Busy => Ok(Step::Busy),
            AcceptOutcome::Accepted { stream, peer } => {
                let conn = self.wrap(stream, peer);
                Ok(handshake(conn, &self.config.magic, self.config.handshake_timeout).await)
            }
        }
    }

    /// Wait for the next client that completes the handshake.
    ///
    /// Busy attempts are retried after a delay that doubles up to
    /// `backoff_max`. Rejected clients are skipped.
    pub async fn accept_client(&mut self) -> Result<Connection> {
        let mut delay = self.config.backoff_initial;
        loop {
            match self.step().await? {
                Step::Established(conn) => return Ok(conn),
                Step::Rejected { .. } => delay = self.config.backoff_initial,
                Step::Busy => {
                    self.back_off(delay).await;
                    delay = next_backoff(delay, self.config.backoff_max);
                }
            }
        }
    }

    /// Wait for the next connected socket, without a handshake.
    async fn accept_stream(&mut self) -> Result<(Stream, String)> {
        let mut delay = self.config.backoff_initial;
        loop {
            match self.listener.accept(self.config.accept_wait).await? {
                AcceptOutcome::Accepted { stream, peer } => return Ok((stream, peer)),
                AcceptOutcome::Busy => {
                    self.back_off(delay).await;
                    delay = next_backoff(delay, self.config.backoff_max);
                }
            }
        }
    }

    async fn back_off(&self, delay: Duration) {
        tracing::trace!(
            "No client on {}, retrying in {:?}",
            self.listener.local_endpoint(),
            delay
        );
        tokio::time::sleep(delay).await;
    }

    fn wrap(&self, stream: Stream, peer: String) -> Connection {
        Connection::with_config(
            stream,
            Role::Server,
            peer,
            Arc::clone(&self.table),
            self.config.connection.clone(),
        )
    }

    /// Serve clients concurrently until `shutdown` resolves.
    ///
    /// Each accepted client gets its own task, which performs the HELO
    /// handshake and then passes the connection to `session`. A slow or
    /// silent client therefore never holds up the accept loop. At most
    /// `max_sessions` tasks run at once; further clients wait in the
    /// listen backlog. Handshake and session errors are logged and do not
    /// stop the server. On shutdown, running sessions are awaited.
    pub async fn serve_until<Sd, F, Fut>(&mut self, shutdown: Sd, session: F) -> Result<()>
    where
        Sd: Future<Output = ()>,
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let limit = session_limit(self.config.max_sessions);
        let permits = Arc::new(Semaphore::new(limit as usize));
        let session = Arc::new(session);
        tokio::pin!(shutdown);

        let result = loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break Err(PkgError::Protocol("session limiter closed".to_string())),
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = self.accept_stream() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => break Err(e),
                },
            };

            let conn = self.wrap(stream, peer);
            let magic = self.config.magic.clone();
            let hello_wait = self.config.handshake_timeout;
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let _permit = permit;
                let conn = match handshake(conn, &magic, hello_wait).await {
                    Step::Established(conn) => conn,
                    _ => return,
                };
                let peer = conn.peer().to_string();
                match (*session)(conn).await {
                    Ok(()) => tracing::debug!("Session with {} finished", peer),
                    Err(e) => tracing::error!("Session with {} failed: {}", peer, e),
                }
            });
        };

        tracing::debug!("Waiting for running sessions to finish");
        // Every permit back means every session task has ended
        let _all = permits.acquire_many(limit).await;
        result
    }
}

/// Run the HELO handshake on a freshly accepted connection.
///
/// A rejected connection is closed before returning.
async fn handshake(mut conn: Connection, magic: &str, limit: Option<Duration>) -> Step {
    let peer = conn.peer().to_string();
    match conn.expect_hello(magic, limit).await {
        Ok(()) => {
            tracing::info!("Established session with {}", peer);
            Step::Established(conn)
        }
        Err(e) => {
            tracing::warn!("Rejected client {}: {}", peer, e);
            if let Err(close_err) = conn.close().await {
                tracing::debug!("Error closing rejected client {}: {}", peer, close_err);
            }
            Step::Rejected {
                peer,
                reason: e.to_string(),
            }
        }
    }
}

/// Number of concurrent sessions the semaphore can actually hand out.
fn session_limit(requested: usize) -> u32 {
    let capped = requested.clamp(1, Semaphore::MAX_PERMITS);
    u32::try_from(capped).unwrap_or(u32::MAX)
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use crate::session::{MSG_DATA, MSG_HELO};
    use tokio::io::AsyncWriteExt;

    fn test_config() -> ServerConfig {
        ServerConfig::new(Endpoint::localhost(0))
            .accept_wait(Duration::from_millis(20))
            .backoff(Duration::from_millis(5), Duration::from_millis(40))
            .handshake_timeout(Some(Duration::from_secs(5)))
    }

    async fn raw_client(endpoint: &Endpoint, frames: &[(u16, &[u8])]) -> Stream {
        let mut stream = Stream::connect(endpoint).await.unwrap();
        for (t, p) in frames {
            stream.write_all(&encode_frame(*t, p).unwrap()).await.unwrap();
        }
        stream
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.endpoint.port(), Some(DEFAULT_PORT));
        assert_eq!(config.magic, "TPKG");
        assert_eq!(config.handshake_timeout, Some(DEFAULT_HANDSHAKE_TIMEOUT));
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::default()
            .magic("XPKG")
            .handshake_timeout(None)
            .backoff(Duration::from_millis(10), Duration::from_millis(1))
            .max_sessions(0);

        assert_eq!(config.magic, "XPKG");
        assert!(config.handshake_timeout.is_none());
        assert_eq!(config.backoff_max, Duration::from_millis(10));
        assert_eq!(config.max_sessions, 1);
    }

    #[test]
    fn test_backoff_is_bounded() {
        let max = Duration::from_millis(100);
        let mut delay = Duration::from_millis(30);
        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_millis(60));
        delay = next_backoff(delay, max);
        assert_eq!(delay, max);
        assert_eq!(next_backoff(delay, max), max);
    }

    #[test]
    fn test_session_limit_fits_semaphore() {
        assert_eq!(session_limit(0), 1);
        assert_eq!(session_limit(8), 8);

        let huge = session_limit(usize::MAX);
        assert!(huge as usize <= Semaphore::MAX_PERMITS);
        assert_eq!(ServerConfig::default().max_sessions(usize::MAX).max_sessions, huge as usize);
    }

    #[tokio::test]
    async fn test_step_busy_without_clients() {
        let mut server = Server::bind(test_config(), DispatchTable::new()).await.unwrap();
        assert!(matches!(server.step().await.unwrap(), Step::Busy));
        assert_eq!(server.state(), ListenerState::Listening);
    }

    #[tokio::test]
    async fn test_step_establishes_good_client() {
        let mut server = Server::bind(test_config(), DispatchTable::new()).await.unwrap();
        let endpoint = server.local_endpoint().clone();

        let _client = raw_client(&endpoint, &[(MSG_HELO, b"TPKG\0")]).await;

        let conn = server.accept_client().await.unwrap();
        assert_eq!(conn.role(), Role::Server);
        assert_eq!(conn.phase(), crate::connection::SessionPhase::Established);
    }

    #[tokio::test]
    async fn test_step_rejects_wrong_magic() {
        let mut server = Server::bind(test_config(), DispatchTable::new()).await.unwrap();
        let endpoint = server.local_endpoint().clone();

        let _client = raw_client(&endpoint, &[(MSG_HELO, b"NOPE\0")]).await;

        let step = loop {
            match server.step().await.unwrap() {
                Step::Busy => continue,
                other => break other,
            }
        };
        match step {
            Step::Rejected { reason, .. } => assert!(reason.contains("magic")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_before_helo_is_dispatched() {
        let seen = Arc::new(std::sync::Mutex::new(0));
        let counter = seen.clone();
        let table = DispatchTable::new().on(MSG_DATA, "DATA", move |_ctx, _payload| {
            *counter.lock().unwrap() += 1;
        });
        let mut server = Server::bind(test_config(), table).await.unwrap();
        let endpoint = server.local_endpoint().clone();

        let _client = raw_client(&endpoint, &[(MSG_DATA, b"early\0"), (MSG_HELO, b"TPKG\0")]).await;

        server.accept_client().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_handshake_timeout_rejects() {
        let config = test_config().handshake_timeout(Some(Duration::from_millis(30)));
        let mut server = Server::bind(config, DispatchTable::new()).await.unwrap();
        let endpoint = server.local_endpoint().clone();

        let _silent = raw_client(&endpoint, &[]).await;

        let step = loop {
            match server.step().await.unwrap() {
                Step::Busy => continue,
                other => break other,
            }
        };
        assert!(matches!(step, Step::Rejected { .. }));
    }
}
