//! Load balancing subsystem (credential selection).
//!
//! # Data Flow
//! ```text
//! Caller picks a provider
//!     → pool.rs (find the provider's balancer)
//!     → balancer.rs (weighted least-usage selection among available keys)
//!     → api_key.rs (usage counted on the chosen key)
//!     → key string returned to the caller's transport
//! ```
//!
//! # Design Decisions
//! - Not wired into the middleware chain; the caller consults it
//! - Keys never leave the balancer by reference
//! - Pool lookups are lock-free; key state sits behind one RwLock per provider

pub mod api_key;
pub mod balancer;
pub mod pool;

use thiserror::Error;

pub use api_key::ApiKey;
pub use balancer::{BalancerStats, KeyBalancer, KeyUsage};
pub use pool::KeyPool;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadBalancerError {
    #[error("api key list is empty")]
    EmptyApiKeyList,

    #[error("no api key available")]
    NoApiKeyAvailable,

    #[error("api key already exists")]
    AlreadyExists,

    #[error("api key not found")]
    NotFound,

    #[error("weight must be greater than 0")]
    WeightMustBeGreaterThan0,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}
