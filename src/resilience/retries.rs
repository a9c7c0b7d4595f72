//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (pluggable `RetryCondition`)
//! - Wait between attempts according to the configured `BackoffStrategy`
//! - Abort the wait promptly when the call is cancelled or its deadline passes
//! - Report each retry to an optional asynchronous `RetryNotifier`
//!
//! # Design Decisions
//! - `max_attempts` counts retries, so a call runs at most `max_attempts + 1` times
//! - Exhaustion wraps the last error in `CallError::RetriesExhausted`
//! - Non-retryable errors are returned unchanged
//! - Configuration is normalised once, at construction

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CallError;
use crate::middleware::{CallContext, CallResult, Middleware, Next};
use crate::observability::metrics;
use crate::resilience::backoff::{Backoff, BackoffStrategy};
use crate::resilience::classify;
use crate::resilience::notify::{RetryEvent, RetryNotifier};

pub const RETRY_PRIORITY: i32 = 20;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_PERCENT: f64 = 0.1;

/// Predicate deciding whether an error deserves another attempt.
#[derive(Clone)]
pub struct RetryCondition(Arc<dyn Fn(&CallError) -> bool + Send + Sync>);

impl RetryCondition {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CallError) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Retry every error except cancellation.
    pub fn always() -> Self {
        Self::new(|err| !err.is_cancellation())
    }

    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Retry only status errors carrying one of `statuses`.
    pub fn on_status(statuses: impl Into<Vec<u16>>) -> Self {
        let statuses = statuses.into();
        Self::new(move |err| match err {
            CallError::Status { status, .. } => statuses.contains(status),
            _ => false,
        })
    }

    pub fn should_retry(&self, err: &CallError) -> bool {
        (self.0)(err)
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::new(classify::is_retryable)
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryCondition(..)")
    }
}

/// Retry policy.
#[derive(Debug, Clone)]
pub struct RetryMiddlewareConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter spread as a fraction of the exponential delay, in (0, 1].
    pub jitter_percent: f64,
    pub condition: RetryCondition,
    pub on_retry: Option<RetryNotifier>,
}

impl Default for RetryMiddlewareConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategy: BackoffStrategy::Exponential,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            condition: RetryCondition::default(),
            on_retry: None,
        }
    }
}

impl RetryMiddlewareConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter_percent(mut self, jitter_percent: f64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_on_retry(mut self, notifier: RetryNotifier) -> Self {
        self.on_retry = Some(notifier);
        self
    }

    /// Replace unusable values with defaults.
    ///
    /// `max_delay` is raised to at least ten times `base_delay`.
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.base_delay.is_zero() {
            self.base_delay = DEFAULT_BASE_DELAY;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        let floor = self.base_delay.saturating_mul(10);
        if self.max_delay < floor {
            self.max_delay = floor;
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            self.multiplier = DEFAULT_MULTIPLIER;
        }
        if !(self.jitter_percent > 0.0 && self.jitter_percent <= 1.0) {
            self.jitter_percent = DEFAULT_JITTER_PERCENT;
        }
        self
    }
}

/// Re-runs the rest of the chain on retryable failures.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    config: RetryMiddlewareConfig,
    backoff: Backoff,
}

impl RetryMiddleware {
    pub fn new(config: RetryMiddlewareConfig) -> Self {
        let config = config.normalized();
        let backoff = Backoff::new(
            config.strategy,
            config.base_delay,
            config.max_delay,
            config.multiplier,
            config.jitter_percent,
        );
        Self { config, backoff }
    }

    /// Effective configuration after normalisation.
    pub fn config(&self) -> &RetryMiddlewareConfig {
        &self.config
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(RetryMiddlewareConfig::default())
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for RetryMiddleware
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn process(
        &self,
        ctx: &mut CallContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> CallResult<Resp> {
        let max_attempts = self.config.max_attempts;
        ctx.info.max_attempts = max_attempts;

        let mut attempt: u32 = 0;

        loop {
            ctx.info.attempt = attempt;
            metrics::record_attempt(&ctx.info.provider);
            let err = match next.run(ctx, request.clone()).await {
                Ok(response) => {
                    ctx.info.finish(Ok(()));
                    return Ok(response);
                }
                Err(err) => err,
            };

            ctx.info.finish(Err(&err));

            if !self.config.condition.should_retry(&err) {
                tracing::debug!(
                    provider = %ctx.info.provider,
                    request_id = %ctx.info.request_id,
                    attempt = attempt + 1,
                    error = %err,
                    "Error not retryable"
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    provider = %ctx.info.provider,
                    request_id = %ctx.info.request_id,
                    attempts = attempt + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(CallError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }

            attempt += 1;
            let delay = self.backoff.delay(attempt);

            if let Some(notifier) = &self.config.on_retry {
                let mut info = ctx.info.clone();
                info.attempt = attempt;
                notifier.notify(RetryEvent { info, delay });
            }

            tracing::info!(
                provider = %ctx.info.provider,
                request_id = %ctx.info.request_id,
                attempt,
                max_attempts,
                strategy = %self.config.strategy,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying provider call"
            );
            metrics::record_retry(&ctx.info.provider, self.config.strategy.as_str());
            metrics::record_retry_delay(delay);

            let interrupted = tokio::select! {
                biased;
                reason = ctx.cancelled() => Some(reason),
                _ = tokio::time::sleep(delay) => None,
            };
            if let Some(reason) = interrupted {
                tracing::debug!(
                    provider = %ctx.info.provider,
                    request_id = %ctx.info.request_id,
                    reason = %reason,
                    "Retry wait interrupted"
                );
                ctx.info.finish(Err(&reason));
                return Err(reason);
            }
        }
    }

    fn name(&self) -> &str {
        "retry"
    }

    fn priority(&self) -> i32 {
        RETRY_PRIORITY
    }
}
