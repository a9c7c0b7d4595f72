//! API key record.

use std::cmp::Ordering;
use std::fmt;

use crate::config::schema::KeyConfig;
use crate::load_balancer::LoadBalancerError;

/// One credential and its usage bookkeeping.
///
/// `weight` is always at least 1.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub key: String,
    /// Number of times this key has been handed out.
    pub times: u32,
    pub available: bool,
    pub weight: u32,
}

impl ApiKey {
    /// Available key with weight 1 and no usage.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            times: 0,
            available: true,
            weight: 1,
        }
    }

    pub fn with_weight(key: impl Into<String>, weight: u32) -> Result<Self, LoadBalancerError> {
        if weight == 0 {
            return Err(LoadBalancerError::WeightMustBeGreaterThan0);
        }
        Ok(Self {
            weight,
            ..Self::new(key)
        })
    }

    /// Weighted usage, `times / weight`.
    pub fn score(&self) -> f64 {
        f64::from(self.times) / f64::from(self.weight)
    }

    /// Exact comparison of `times / weight` by cross-multiplication.
    pub fn cmp_usage(&self, other: &ApiKey) -> Ordering {
        let lhs = u64::from(self.times) * u64::from(other.weight);
        let rhs = u64::from(other.times) * u64::from(self.weight);
        lhs.cmp(&rhs)
    }

    /// Key suitable for logs.
    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &self.masked())
            .field("times", &self.times)
            .field("available", &self.available)
            .field("weight", &self.weight)
            .finish()
    }
}

impl From<&KeyConfig> for ApiKey {
    fn from(config: &KeyConfig) -> Self {
        Self {
            key: config.key.clone(),
            times: 0,
            available: config.available,
            weight: config.weight.max(1),
        }
    }
}

/// Keep the first and last four characters of long secrets.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
