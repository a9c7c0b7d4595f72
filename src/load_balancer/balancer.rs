//! Weighted least-usage key selection.
//!
//! # Responsibilities
//! - Hand out the available key with the lowest `times / weight`
//! - Register, unregister, enable, disable and reweight keys
//! - Report usage without exposing internal state
//!
//! # Design Decisions
//! - Scoring runs under a read lock, the usage increment under a write lock.
//!   Concurrent selections may briefly pick the same key; usage counts are
//!   a soft signal, not a quota.
//! - Ties go to the earliest key in registration order
//! - Callers only ever receive copies

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::load_balancer::api_key::{mask_key, ApiKey};
use crate::load_balancer::LoadBalancerError;

/// Usage snapshot of one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyUsage {
    /// Masked key.
    pub key: String,
    pub times: u32,
    pub weight: u32,
    pub available: bool,
    pub score: f64,
}

/// Aggregate usage across a balancer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancerStats {
    pub total_keys: usize,
    pub available_keys: usize,
    pub total_requests: u64,
    pub keys: Vec<KeyUsage>,
}

/// Credential selector for one provider.
#[derive(Debug, Default)]
pub struct KeyBalancer {
    keys: RwLock<Vec<ApiKey>>,
}

impl KeyBalancer {
    /// Build from plain key strings. Duplicates after the first are skipped.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_keys(keys.into_iter().map(ApiKey::new))
    }

    /// Build from prepared records. Duplicates after the first are skipped.
    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = ApiKey>,
    {
        let mut list: Vec<ApiKey> = Vec::new();
        for mut key in keys {
            if list.iter().any(|k| k.key == key.key) {
                tracing::debug!(key = %key.masked(), "Skipping duplicate API key");
                continue;
            }
            key.weight = key.weight.max(1);
            list.push(key);
        }
        Self {
            keys: RwLock::new(list),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ApiKey>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ApiKey>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the least-used available key and count the use.
    pub fn get_api_key(&self) -> Result<String, LoadBalancerError> {
        let selected = {
            let keys = self.read();
            if keys.is_empty() {
                return Err(LoadBalancerError::EmptyApiKeyList);
            }
            least_used(&keys)
                .map(|k| k.key.clone())
                .ok_or(LoadBalancerError::NoApiKeyAvailable)?
        };

        let mut keys = self.write();
        match keys.iter_mut().find(|k| k.key == selected) {
            Some(key) => key.times = key.times.saturating_add(1),
            None => {
                tracing::debug!(
                    key = %mask_key(&selected),
                    "Selected key removed before use was counted"
                );
            }
        }
        Ok(selected)
    }

    pub fn register_api_key(&self, key: impl Into<String>) -> Result<(), LoadBalancerError> {
        self.insert(ApiKey::new(key))
    }

    pub fn register_weighted_api_key(
        &self,
        key: impl Into<String>,
        weight: u32,
    ) -> Result<(), LoadBalancerError> {
        self.insert(ApiKey::with_weight(key, weight)?)
    }

    fn insert(&self, key: ApiKey) -> Result<(), LoadBalancerError> {
        let mut keys = self.write();
        if keys.iter().any(|k| k.key == key.key) {
            return Err(LoadBalancerError::AlreadyExists);
        }
        tracing::debug!(key = %key.masked(), weight = key.weight, "Registered API key");
        keys.push(key);
        Ok(())
    }

    pub fn unregister_api_key(&self, key: &str) -> Result<(), LoadBalancerError> {
        let mut keys = self.write();
        let index = keys
            .iter()
            .position(|k| k.key == key)
            .ok_or(LoadBalancerError::NotFound)?;
        keys.remove(index);
        tracing::debug!(key = %mask_key(key), "Unregistered API key");
        Ok(())
    }

    /// Include or exclude a key from selection, keeping its usage history.
    pub fn set_availability(&self, key: &str, available: bool) -> Result<(), LoadBalancerError> {
        let mut keys = self.write();
        let entry = keys
            .iter_mut()
            .find(|k| k.key == key)
            .ok_or(LoadBalancerError::NotFound)?;
        entry.available = available;
        Ok(())
    }

    pub fn set_availability_for_all(&self, available: bool) {
        for key in self.write().iter_mut() {
            key.available = available;
        }
    }

    pub fn set_weight(&self, key: &str, weight: u32) -> Result<(), LoadBalancerError> {
        if weight == 0 {
            return Err(LoadBalancerError::WeightMustBeGreaterThan0);
        }
        let mut keys = self.write();
        let entry = keys
            .iter_mut()
            .find(|k| k.key == key)
            .ok_or(LoadBalancerError::NotFound)?;
        entry.weight = weight;
        Ok(())
    }

    /// Copy of every key, in registration order.
    pub fn get_api_key_list(&self) -> Vec<ApiKey> {
        self.read().clone()
    }

    pub fn get_stats(&self) -> BalancerStats {
        let keys = self.read();
        BalancerStats {
            total_keys: keys.len(),
            available_keys: keys.iter().filter(|k| k.available).count(),
            total_requests: keys.iter().map(|k| u64::from(k.times)).sum(),
            keys: keys
                .iter()
                .map(|k| KeyUsage {
                    key: k.masked(),
                    times: k.times,
                    weight: k.weight,
                    available: k.available,
                    score: k.score(),
                })
                .collect(),
        }
    }

    /// Zero every usage counter.
    pub fn reset_usage(&self) {
        for key in self.write().iter_mut() {
            key.times = 0;
        }
    }

    /// Make the key set match `desired`.
    ///
    /// Surviving keys keep their usage count and position; their weight and
    /// availability are taken from `desired`. New keys are appended in order.
    pub fn apply_keys(&self, desired: &[ApiKey]) {
        let mut keys = self.write();
        keys.retain(|k| desired.iter().any(|d| d.key == k.key));
        for wanted in desired {
            match keys.iter_mut().find(|k| k.key == wanted.key) {
                Some(existing) => {
                    existing.weight = wanted.weight.max(1);
                    existing.available = wanted.available;
                }
                None => {
                    let mut key = wanted.clone();
                    key.weight = key.weight.max(1);
                    keys.push(key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Available key with the lowest weighted usage; first wins ties.
fn least_used(keys: &[ApiKey]) -> Option<&ApiKey> {
    keys.iter()
        .filter(|k| k.available)
        .fold(None, |best: Option<&ApiKey>, candidate| match best {
            Some(current) if candidate.cmp_usage(current).is_lt() => Some(candidate),
            Some(current) => Some(current),
            None => Some(candidate),
        })
}
