//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → converted into RetryMiddlewareConfig, idgen Settings, KeyPool
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new GuardConfig sent to the owner (e.g. KeyPool::reconcile)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    GuardConfig, IdGeneratorConfig, KeyConfig, LogFormat, ObservabilityConfig, ProviderConfig,
    RetryConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
