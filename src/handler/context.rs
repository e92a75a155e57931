//! Context passed to dispatch handlers.
//!
//! Handlers run synchronously inside `process`/`bwaitfor` and cannot
//! return errors through the engine. Instead they record a failure on
//! the context, which the engine reports after the handler returns.
//!
//! # Example
//!
//! ```
//! use pkg_transport::handler::HandlerContext;
//! use pkg_transport::Role;
//!
//! let mut failure = None;
//! let mut ctx = HandlerContext::new(2, Some("DATA"), Role::Server, "test", &mut failure);
//! if ctx.msg_type() == 2 {
//!     ctx.fail("unexpected data");
//! }
//! assert_eq!(failure.as_deref(), Some("unexpected data"));
//! ```

use crate::connection::Role;

/// Per-message context given to handlers.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    msg_type: u16,
    name: Option<&'a str>,
    role: Role,
    peer: &'a str,
    failure: &'a mut Option<String>,
}

impl<'a> HandlerContext<'a> {
    /// Create a context for one message delivery.
    pub fn new(
        msg_type: u16,
        name: Option<&'a str>,
        role: Role,
        peer: &'a str,
        failure: &'a mut Option<String>,
    ) -> Self {
        Self {
            msg_type,
            name,
            role,
            peer,
            failure,
        }
    }

    /// Type of the message being delivered.
    #[inline]
    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    /// Name the handler was registered under, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name
    }

    /// Role of the connection the message arrived on.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer identity of the connection.
    #[inline]
    pub fn peer(&self) -> &str {
        self.peer
    }

    /// Record a protocol-level failure.
    ///
    /// The engine stops delivering further messages and returns
    /// [`PkgError::HandlerFailed`](crate::PkgError::HandlerFailed) once the
    /// handler returns. Only the first failure is kept.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            *self.failure = Some(reason.into());
        }
    }

    /// Check whether a failure has already been recorded.
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accessors() {
        let mut failure = None;
        let ctx = HandlerContext::new(3, Some("CIAO"), Role::Client, "127.0.0.1:1", &mut failure);

        assert_eq!(ctx.msg_type(), 3);
        assert_eq!(ctx.name(), Some("CIAO"));
        assert_eq!(ctx.role(), Role::Client);
        assert_eq!(ctx.peer(), "127.0.0.1:1");
        assert!(!ctx.has_failed());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut failure = None;
        let mut ctx = HandlerContext::new(1, None, Role::Server, "peer", &mut failure);

        ctx.fail("first");
        ctx.fail("second");
        assert!(ctx.has_failed());
        assert_eq!(failure.as_deref(), Some("first"));
    }
}
