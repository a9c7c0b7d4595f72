//! Middleware chain subsystem.
//!
//! # Data Flow
//! ```text
//! Chain::execute(ctx, request, handler)
//!     → middleware[0].process(ctx, request, next₁)
//!         → middleware[1].process(ctx, request, next₂)
//!             → ...
//!                 → handler.call(ctx, request)   (transport, owned by the caller)
//! ```
//!
//! # Design Decisions
//! - The first middleware is the outermost wrapper
//! - Order is exactly what the caller supplies; priority is advisory
//! - `Next` may be run zero, one or many times (retry runs it repeatedly)
//! - Request metadata travels in an explicit `CallContext`, never a global

pub mod context;
pub mod logging;
pub mod request_id;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::CallError;

pub use context::{CallContext, RequestInfo};
pub use logging::LoggingMiddleware;
pub use request_id::RequestIdMiddleware;

/// Result type produced by every link of the chain.
pub type CallResult<T> = Result<T, CallError>;

/// Terminal handler performing the actual provider call.
#[async_trait]
pub trait Handler<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, ctx: &mut CallContext, request: Req) -> CallResult<Resp>;
}

/// One link of the chain.
#[async_trait]
pub trait Middleware<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Handle the request, delegating to `next` as many times as needed.
    async fn process(
        &self,
        ctx: &mut CallContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> CallResult<Resp>;

    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Advisory ordering hint; lower values sit further out.
    fn priority(&self) -> i32 {
        0
    }
}

/// Adapter turning a context-free async closure into a `Handler`.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a terminal handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<Req, Resp, F, Fut> Handler<Req, Resp> for FnHandler<F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = CallResult<Resp>> + Send,
{
    async fn call(&self, _ctx: &mut CallContext, request: Req) -> CallResult<Resp> {
        (self.f)(request).await
    }
}

/// Cursor over the remainder of a chain.
pub struct Next<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    middlewares: Arc<[Arc<dyn Middleware<Req, Resp>>]>,
    index: usize,
    handler: Arc<dyn Handler<Req, Resp>>,
}

impl<Req, Resp> Clone for Next<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
            index: self.index,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<Req, Resp> Next<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Invoke the rest of the chain.
    pub fn run<'a>(
        &'a self,
        ctx: &'a mut CallContext,
        request: Req,
    ) -> BoxFuture<'a, CallResult<Resp>> {
        match self.middlewares.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    middlewares: Arc::clone(&self.middlewares),
                    index: self.index + 1,
                    handler: Arc::clone(&self.handler),
                };
                middleware.process(ctx, request, next)
            }
            None => self.handler.call(ctx, request),
        }
    }

    /// Number of middlewares still ahead of the handler.
    pub fn remaining(&self) -> usize {
        self.middlewares.len().saturating_sub(self.index)
    }
}

/// Ordered middleware pipeline.
pub struct Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    middlewares: Arc<[Arc<dyn Middleware<Req, Resp>>]>,
}

impl<Req, Resp> Clone for Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
        }
    }
}

impl<Req, Resp> fmt::Debug for Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("middlewares", &self.names()).finish()
    }
}

impl<Req, Resp> Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a chain in exactly the given order.
    pub fn new(middlewares: Vec<Arc<dyn Middleware<Req, Resp>>>) -> Self {
        Self {
            middlewares: middlewares.into(),
        }
    }

    pub fn builder() -> ChainBuilder<Req, Resp> {
        ChainBuilder::new()
    }

    /// Run `request` through every middleware and finally `handler`.
    pub async fn execute(
        &self,
        ctx: &mut CallContext,
        request: Req,
        handler: Arc<dyn Handler<Req, Resp>>,
    ) -> CallResult<Resp> {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            index: 0,
            handler,
        };
        next.run(ctx, request).await
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Middleware names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }
}

/// Incremental chain construction.
pub struct ChainBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    middlewares: Vec<Arc<dyn Middleware<Req, Resp>>>,
}

impl<Req, Resp> Default for ChainBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> ChainBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware inside the ones already added.
    pub fn with<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<Req, Resp> + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_shared(mut self, middleware: Arc<dyn Middleware<Req, Resp>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Reorder by ascending priority. Stable, so equal priorities keep insertion order.
    pub fn sort_by_priority(mut self) -> Self {
        self.middlewares.sort_by_key(|m| m.priority());
        self
    }

    pub fn build(self) -> Chain<Req, Resp> {
        Chain::new(self.middlewares)
    }
}
