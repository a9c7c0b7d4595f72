//! Per-attempt timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Placed inside the retry middleware so every attempt gets a fresh budget
//! - Timeout errors are distinct from other errors and retryable

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CallError;
use crate::middleware::{CallContext, CallResult, Middleware, Next};

pub const TIMEOUT_PRIORITY: i32 = 30;

/// Bounds each pass through the rest of the chain.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    per_attempt: Duration,
}

impl TimeoutMiddleware {
    pub fn new(per_attempt: Duration) -> Self {
        Self { per_attempt }
    }

    pub fn per_attempt(&self) -> Duration {
        self.per_attempt
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for TimeoutMiddleware
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
        match tokio::time::timeout(self.per_attempt, next.run(ctx, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    provider = %ctx.info.provider,
                    attempt = ctx.info.attempt,
                    timeout_ms = self.per_attempt.as_millis() as u64,
                    "Attempt timed out"
                );
                Err(CallError::Timeout(format!(
                    "attempt exceeded {}ms",
                    self.per_attempt.as_millis()
                )))
            }
        }
    }

    fn name(&self) -> &str {
        "timeout"
    }

    fn priority(&self) -> i32 {
        TIMEOUT_PRIORITY
    }
}
