//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Chain, retry engine, key balancer, ID generator produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for aggregation)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a call
//! - Metric updates are cheap; without an installed recorder they are no-ops
//! - API keys never appear unmasked in logs

pub mod logging;
pub mod metrics;
