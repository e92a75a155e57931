//! Handler module - message dispatch.
//!
//! Provides:
//! - [`DispatchTable`] - maps message types to handlers, with a default slot
//! - [`HandlerContext`] - what a handler knows about the delivery, and how it
//!   reports failure
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pkg_transport::handler::DispatchTable;
//!
//! let table = Arc::new(
//!     DispatchTable::new()
//!         .on(2, "DATA", |ctx, payload| {
//!             if payload.is_empty() {
//!                 ctx.fail("empty DATA message");
//!             }
//!         }),
//! );
//! assert!(table.contains(2));
//! ```

mod context;
mod registry;

pub use context::HandlerContext;
pub use registry::{Dispatched, DispatchTable, Handler, TypedHandler};
