//! Dispatch table mapping message types to handlers.
//!
//! Type 0 never appears on the wire, so registering it installs the
//! "unhandled type" default instead. Without a default, unknown types are
//! logged and dropped.
//!
//! # Example
//!
//! ```
//! use pkg_transport::handler::DispatchTable;
//!
//! let table = DispatchTable::new()
//!     .on(2, "DATA", |_ctx, payload| println!("data: {} bytes", payload.len()))
//!     .default_handler(|ctx, _payload| println!("ignoring type {}", ctx.msg_type()));
//!
//! assert_eq!(table.name_of(2), Some("DATA"));
//! assert!(table.has_default());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::HandlerContext;
use crate::codec::MsgPackCodec;
use crate::protocol::{Message, RESERVED_TYPE};

/// Trait for handler functions.
///
/// Implemented for every `Fn(&mut HandlerContext<'_>, Bytes)` closure.
/// Handlers own the payload they are given.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message payload.
    fn call(&self, ctx: &mut HandlerContext<'_>, payload: Bytes);
}

impl<F> Handler for F
where
    F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) {
        self(ctx, payload)
    }
}

/// Wrapper that deserializes a MsgPack payload before calling the handler.
///
/// A payload that fails to decode is reported through
/// [`HandlerContext::fail`].
pub struct TypedHandler<F, T>
where
    F: Fn(&mut HandlerContext<'_>, T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(&mut HandlerContext<'_>, T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(&mut HandlerContext<'_>, T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) {
        match MsgPackCodec::decode::<T>(&payload) {
            Ok(value) => (self.handler)(ctx, value),
            Err(e) => ctx.fail(format!("undecodable payload: {e}")),
        }
    }
}

/// Entry for a registered type.
struct Entry {
    name: String,
    handler: Box<dyn Handler>,
}

/// Which path a dispatched message took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A handler registered for the type ran.
    Handled,
    /// The table's default handler ran.
    Default,
    /// Nothing matched; the message was logged and dropped.
    Unhandled,
}

/// Mapping from message type to handler, with a default slot.
///
/// Built once by the embedding application, then shared read-only with
/// connections through an `Arc`.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<u16, Entry>,
    default: Option<Entry>,
}

impl DispatchTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler (builder style).
    ///
    /// Registering type 0 installs the default handler.
    pub fn on<F>(mut self, msg_type: u16, name: &str, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
    {
        self.register(msg_type, name, handler);
        self
    }

    /// Register a handler whose payload is decoded from MsgPack first.
    pub fn on_msgpack<F, T>(mut self, msg_type: u16, name: &str, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, T) + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.insert(msg_type, name, Box::new(TypedHandler::new(handler)));
        self
    }

    /// Install the handler invoked for types with no specific handler.
    pub fn default_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
    {
        self.on(RESERVED_TYPE, "default", handler)
    }

    /// Register a handler in place.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<F>(&mut self, msg_type: u16, name: &str, handler: F)
    where
        F: Fn(&mut HandlerContext<'_>, Bytes) + Send + Sync + 'static,
    {
        self.insert(msg_type, name, Box::new(handler));
    }

    fn insert(&mut self, msg_type: u16, name: &str, handler: Box<dyn Handler>) {
        let entry = Entry {
            name: name.to_string(),
            handler,
        };
        if msg_type == RESERVED_TYPE {
            self.default = Some(entry);
        } else {
            self.handlers.insert(msg_type, entry);
        }
    }

    /// Get the handler registered for a type.
    pub fn get(&self, msg_type: u16) -> Option<&dyn Handler> {
        self.handlers.get(&msg_type).map(|e| e.handler.as_ref())
    }

    /// Get the name registered for a type.
    pub fn name_of(&self, msg_type: u16) -> Option<&str> {
        self.handlers.get(&msg_type).map(|e| e.name.as_str())
    }

    /// Check whether a specific handler exists for a type.
    pub fn contains(&self, msg_type: u16) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    /// Check whether a default handler is installed.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Registered types in ascending order (the default slot excluded).
    pub fn types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Number of type-specific handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no type-specific handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver one message to its handler, the default, or the log.
    ///
    /// `ctx` must have been built for `msg`.
    pub fn dispatch(&self, msg: Message, ctx: &mut HandlerContext<'_>) -> Dispatched {
        if let Some(entry) = self.handlers.get(&msg.msg_type) {
            entry.handler.call(ctx, msg.payload);
            return Dispatched::Handled;
        }

        if let Some(entry) = &self.default {
            entry.handler.call(ctx, msg.payload);
            return Dispatched::Default;
        }

        tracing::warn!(
            "Unhandled message type {} ({} bytes) from {}",
            msg.msg_type,
            msg.payload.len(),
            ctx.peer()
        );
        Dispatched::Unhandled
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<(u16, &str)> = self
            .handlers
            .iter()
            .map(|(t, e)| (*t, e.name.as_str()))
            .collect();
        names.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("handlers", &names)
            .field("default", &self.default.as_ref().map(|e| e.name.as_str()))
            .finish()
    }
}
