//! Request identifier stamping.

use std::sync::Arc;

use async_trait::async_trait;

use crate::idgen::Flake;
use crate::middleware::{CallContext, CallResult, Middleware, Next};

/// Default position: outermost, so every later log line carries the id.
pub const REQUEST_ID_PRIORITY: i32 = 0;

/// Fills `RequestInfo::request_id` from a shared generator when the caller
/// has not supplied one.
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    generator: Arc<Flake>,
}

impl RequestIdMiddleware {
    pub fn new(generator: Arc<Flake>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for RequestIdMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn process(
        &self,
        ctx: &mut CallContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> CallResult<Resp> {
        if ctx.info.request_id.is_empty() {
            ctx.info.request_id = self.generator.request_id()?;
        }
        next.run(ctx, request).await
    }

    fn name(&self) -> &str {
        "request_id"
    }

    fn priority(&self) -> i32 {
        REQUEST_ID_PRIORITY
    }
}
