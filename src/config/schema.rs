//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::idgen::Settings;
use crate::load_balancer::api_key::mask_key;
use crate::resilience::notify::DEFAULT_NOTIFY_CAPACITY;
use crate::resilience::{BackoffStrategy, RetryMiddlewareConfig};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Retry engine settings.
    pub retry: RetryConfig,

    /// ID generator settings.
    pub id_generator: IdGeneratorConfig,

    /// Providers and their API keys.
    pub providers: Vec<ProviderConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,

    pub strategy: BackoffStrategy,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    pub multiplier: f64,

    /// Fraction of the delay used as jitter spread, in (0, 1].
    pub jitter_percent: f64,

    /// Per-attempt timeout; no timeout when absent.
    pub attempt_timeout_ms: Option<u64>,

    /// Depth of the retry notification queue.
    pub notify_queue_capacity: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_percent: 0.1,
            attempt_timeout_ms: None,
            notify_queue_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    /// Engine configuration with the default condition and no notifier.
    pub fn to_middleware_config(&self) -> RetryMiddlewareConfig {
        RetryMiddlewareConfig::default()
            .with_max_attempts(self.max_attempts)
            .with_strategy(self.strategy)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_jitter_percent(self.jitter_percent)
    }
}

/// ID generator configuration. Absent fields use the generator defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IdGeneratorConfig {
    pub bits_sequence: Option<u8>,

    pub bits_machine_id: Option<u8>,

    pub time_unit_ms: Option<u64>,

    /// Epoch of the time field (RFC 3339).
    pub start_time: Option<DateTime<Utc>>,

    /// Explicit machine ID; derived from a private IPv4 address when absent.
    pub machine_id: Option<u32>,
}

impl IdGeneratorConfig {
    pub fn to_settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(bits) = self.bits_sequence {
            settings = settings.with_bits_sequence(bits);
        }
        if let Some(bits) = self.bits_machine_id {
            settings = settings.with_bits_machine_id(bits);
        }
        if let Some(ms) = self.time_unit_ms {
            settings = settings.with_time_unit(Duration::from_millis(ms));
        }
        if let Some(start) = self.start_time {
            settings = settings.with_start_time(start);
        }
        if let Some(id) = self.machine_id {
            settings = settings.with_machine_id(move || Ok(id));
        }
        settings
    }
}

/// A provider and the keys it may be called with.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider identifier (e.g., "openai").
    pub name: String,

    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

/// One API key entry.
#[derive(Clone, Deserialize, Serialize)]
pub struct KeyConfig {
    pub key: String,

    /// Weight for weighted least-usage selection (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default = "default_available")]
    pub available: bool,
}

impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfig")
            .field("key", &mask_key(&self.key))
            .field("weight", &self.weight)
            .field("available", &self.available)
            .finish()
    }
}

fn default_weight() -> u32 {
    1
}

fn default_available() -> bool {
    true
}
