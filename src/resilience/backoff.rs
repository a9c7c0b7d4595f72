//! Backoff strategies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the wait before a retry grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Always `base_delay`.
    Fixed,
    /// `attempt × base_delay`.
    Linear,
    /// `base_delay × multiplier^(attempt-1)`.
    #[default]
    Exponential,
    /// Exponential with a random `±jitter_percent` perturbation.
    Jitter,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::Jitter => "jitter",
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "jitter" => Ok(BackoffStrategy::Jitter),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// Delay calculator for one retry configuration.
///
/// Every result lies in `[base / 2, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_percent: f64,
    /// Largest attempt for which `attempt × base` stays within `max`.
    linear_cap: u64,
    /// Largest exponent for which `base × multiplier^exp` stays within `max`.
    /// `None` when the multiplier cannot grow the delay.
    max_exponent: Option<u32>,
}

impl Backoff {
    pub fn new(
        strategy: BackoffStrategy,
        base: Duration,
        max: Duration,
        multiplier: f64,
        jitter_percent: f64,
    ) -> Self {
        let linear_cap = if base.is_zero() {
            u64::MAX
        } else {
            u64::try_from(max.as_nanos() / base.as_nanos()).unwrap_or(u64::MAX)
        };

        let max_exponent = if multiplier > 1.0 && multiplier.is_finite() && !base.is_zero() {
            let ratio = max.as_secs_f64() / base.as_secs_f64();
            let exp = ratio.ln() / multiplier.ln();
            // Float-to-int casts saturate.
            Some(if exp.is_finite() && exp > 0.0 { exp.floor() as u32 } else { 0 })
        } else {
            None
        };

        Self {
            strategy,
            base,
            max,
            multiplier,
            jitter_percent,
            linear_cap,
            max_exponent,
        }
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Wait before retry number `attempt` (1 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Linear => self.linear(attempt),
            BackoffStrategy::Exponential => self.exponential(attempt),
            BackoffStrategy::Jitter => self.jittered(attempt),
        };
        self.clamp(raw)
    }

    fn linear(&self, attempt: u32) -> Duration {
        if u64::from(attempt) > self.linear_cap {
            return self.max;
        }
        self.base * attempt
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let exp = attempt - 1;
        if exp == 0 {
            return self.base;
        }
        let Some(max_exponent) = self.max_exponent else {
            return self.base;
        };
        if exp > max_exponent {
            return self.max;
        }

        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp as i32);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .max(self.base)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let center = self.exponential(attempt).as_secs_f64();
        let spread = center * self.jitter_percent;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let secs = (center + offset).max(center / 2.0);
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.max(self.base / 2).min(self.max)
    }
}
