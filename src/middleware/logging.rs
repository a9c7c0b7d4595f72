//! Structured call logging.
//!
//! Emits one event per finished call and records call metrics. Reads the
//! `RequestInfo` after the inner chain returns, so placing it outside the
//! retry middleware reports the final attempt count.

use std::time::Instant;

use async_trait::async_trait;

use crate::middleware::{CallContext, CallResult, Middleware, Next};
use crate::observability::metrics;

/// Default position: inside request id stamping, outside retries.
pub const LOGGING_PRIORITY: i32 = 10;

#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for LoggingMiddleware
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
        tracing::debug!(
            provider = %ctx.info.provider,
            model = %ctx.info.model,
            method = %ctx.info.method,
            request_id = %ctx.info.request_id,
            "Dispatching provider call"
        );

        let started = Instant::now();
        let result = next.run(ctx, request).await;
        let elapsed = started.elapsed();

        metrics::record_call(&ctx.info.provider, result.is_ok(), elapsed);

        match &result {
            Ok(_) => tracing::info!(
                provider = %ctx.info.provider,
                model = %ctx.info.model,
                request_id = %ctx.info.request_id,
                user_id = ctx.info.user_id.as_deref().unwrap_or("-"),
                attempts = ctx.info.attempt + 1,
                duration_ms = elapsed.as_millis() as u64,
                "Provider call succeeded"
            ),
            Err(e) => tracing::warn!(
                provider = %ctx.info.provider,
                model = %ctx.info.model,
                request_id = %ctx.info.request_id,
                user_id = ctx.info.user_id.as_deref().unwrap_or("-"),
                attempts = ctx.info.attempt + 1,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "Provider call failed"
            ),
        }

        result
    }

    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        LOGGING_PRIORITY
    }
}
