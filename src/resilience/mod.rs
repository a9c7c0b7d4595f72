//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Chain:
//!     → retries.rs (classify failure, wait per backoff.rs, run next again)
//!         → timeouts.rs (bound a single attempt)
//!             → transport handler
//!     → notify.rs (retry events delivered off the call path)
//! ```
//!
//! # Design Decisions
//! - Retry and timeout are ordinary middlewares; ordering is up to the caller
//! - Classification prefers structured error variants over message text
//! - Waiting between attempts always honours cancellation

pub mod backoff;
pub mod classify;
pub mod notify;
pub mod retries;
pub mod timeouts;

pub use backoff::{Backoff, BackoffStrategy};
pub use classify::{is_retryable, is_retryable_status};
pub use notify::{RetryEvent, RetryNotifier};
pub use retries::{RetryCondition, RetryMiddleware, RetryMiddlewareConfig};
pub use timeouts::TimeoutMiddleware;
