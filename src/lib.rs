//! Provider call guard: retries, credential selection and request identity
//! for outbound provider calls.
//!
//! ```text
//! caller ── KeyPool ──────────────▶ api key
//!        ── Chain::execute ──▶ logging ─▶ request id ─▶ retry ─▶ timeout ─▶ transport
//!        ── Flake ────────────────▶ 63-bit id / request id
//! ```

pub mod config;
pub mod error;
pub mod idgen;
pub mod load_balancer;
pub mod middleware;
pub mod observability;
pub mod resilience;

pub use config::GuardConfig;
pub use error::{CallError, NetworkKind};
pub use idgen::{Flake, FlakeError, Settings};
pub use load_balancer::{KeyBalancer, KeyPool, LoadBalancerError};
pub use middleware::{CallContext, Chain, Handler, Middleware, Next, RequestInfo};
pub use resilience::{BackoffStrategy, RetryMiddleware, RetryMiddlewareConfig};
