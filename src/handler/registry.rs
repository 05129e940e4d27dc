//! Protocol registry for dispatching messages by protocol id.
//!
//! The registry maps each 16-bit protocol id to a factory that builds a fresh
//! [`Handler`] per message. Factories receive the [`RequestContext`], which is
//! also how they resolve dependencies from the connection's attachments.
//! The registry is built once at startup and shared read-only by every
//! connection.
//!
//! # Example
//!
//! ```ignore
//! use framewire::handler::{BoxFuture, Handler, HandlerResult, ProtocolRegistry, RequestContext};
//!
//! struct Say {
//!     ctx: RequestContext,
//!     session: Option<Arc<Session>>,
//! }
//!
//! impl Handler for Say {
//!     fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
//!         Box::pin(async move { self.ctx.respond(2, self.ctx.payload()).await })
//!     }
//! }
//!
//! let mut registry = ProtocolRegistry::new();
//! registry.register(1, |ctx: RequestContext| Say {
//!     session: ctx.inject::<Session>(),
//!     ctx,
//! })?;
//! registry.register_fn(9, |ctx| async move { ctx.respond(9, b"pong").await })?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::RequestContext;
use crate::error::{FramewireError, Result};

/// Result type for handler execution.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A per-message handler, built fresh for every dispatched message.
pub trait Handler: Send + 'static {
    /// Run the handler. Errors are reported to the recover hooks.
    fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult>;

    /// Name shown to request hooks and logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Builds a handler for one message.
pub trait HandlerFactory: Send + Sync + 'static {
    /// Build a handler, resolving its dependencies through `ctx`.
    fn build(&self, ctx: RequestContext) -> Box<dyn Handler>;
}

impl<F, H> HandlerFactory for F
where
    F: Fn(RequestContext) -> H + Send + Sync + 'static,
    H: Handler,
{
    fn build(&self, ctx: RequestContext) -> Box<dyn Handler> {
        Box::new(self(ctx))
    }
}

/// Handler that calls a registered closure when executed.
///
/// The closure runs inside `execute`, after the request hooks have seen the
/// handler.
struct FnHandler<F, Fut> {
    handler: Arc<F>,
    ctx: RequestContext,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
        let FnHandler { handler, ctx, .. } = *self;
        Box::pin((*handler)(ctx))
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

/// Registry mapping protocol ids to handler factories.
#[derive(Default)]
pub struct ProtocolRegistry {
    routes: HashMap<u16, Box<dyn HandlerFactory>>,
}

impl ProtocolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory for a protocol id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProtocol` if the id is already registered; the
    /// existing registration is kept.
    pub fn register<F>(&mut self, protocol_id: u16, factory: F) -> Result<()>
    where
        F: HandlerFactory,
    {
        if self.routes.contains_key(&protocol_id) {
            return Err(FramewireError::DuplicateProtocol(protocol_id));
        }
        self.routes.insert(protocol_id, Box::new(factory));
        Ok(())
    }

    /// Register an async closure as the handler for a protocol id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProtocol` if the id is already registered.
    pub fn register_fn<F, Fut>(&mut self, protocol_id: u16, handler: F) -> Result<()>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(protocol_id, move |ctx: RequestContext| FnHandler {
            handler: Arc::clone(&handler),
            ctx,
            _future: PhantomData,
        })
    }

    /// Get the factory for a protocol id.
    pub fn get(&self, protocol_id: u16) -> Option<&dyn HandlerFactory> {
        self.routes.get(&protocol_id).map(|f| f.as_ref())
    }

    /// Check whether a protocol id is registered.
    pub fn contains(&self, protocol_id: u16) -> bool {
        self.routes.contains_key(&protocol_id)
    }

    /// Registered protocol ids, sorted.
    pub fn protocol_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.routes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered protocol ids.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("protocol_ids", &self.protocol_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Handler for Noop {
        fn execute(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_register_factory() {
        let mut registry = ProtocolRegistry::new();
        registry.register(1, |_ctx: RequestContext| Noop).unwrap();

        assert!(registry.contains(1));
        assert!(registry.get(1).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_fn() {
        let mut registry = ProtocolRegistry::new();
        registry
            .register_fn(2, |_ctx: RequestContext| async { Ok(()) })
            .unwrap();

        assert!(registry.contains(2));
    }

    #[test]
    fn test_duplicate_protocol_rejected() {
        let mut registry = ProtocolRegistry::new();
        registry.register(1, |_ctx: RequestContext| Noop).unwrap();

        let err = registry
            .register_fn(1, |_ctx: RequestContext| async { Ok(()) })
            .unwrap_err();

        assert!(matches!(err, FramewireError::DuplicateProtocol(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = ProtocolRegistry::new();

        assert!(registry.get(99).is_none());
        assert!(!registry.contains(99));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_protocol_ids_sorted() {
        let mut registry = ProtocolRegistry::new();
        for id in [30u16, 10, 20] {
            registry.register(id, |_ctx: RequestContext| Noop).unwrap();
        }

        assert_eq!(registry.protocol_ids(), vec![10, 20, 30]);
    }

    #[test]
    fn test_default_handler_name() {
        let handler: Box<dyn Handler> = Box::new(Noop);
        assert!(handler.name().ends_with("Noop"));
    }
}
