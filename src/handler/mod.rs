//! Handler module - protocol registry, handlers and contexts.
//!
//! Provides:
//! - [`ProtocolRegistry`] - maps protocol ids to handler factories
//! - [`Handler`] / [`HandlerFactory`] - one handler instance per message
//! - [`RequestContext`] - payload, attachments and `respond` for handlers
//! - [`Push`] / [`PushContext`] - server-initiated messages

mod context;
mod registry;

pub use context::{Push, PushContext, RequestContext};
pub use registry::{BoxFuture, Handler, HandlerFactory, HandlerResult, ProtocolRegistry};
