//! Provider key pools.
//!
//! # Responsibilities
//! - Manage one `KeyBalancer` per provider name
//! - Select keys by provider
//! - Apply reloaded configuration without losing usage history

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ProviderConfig;
use crate::load_balancer::api_key::{mask_key, ApiKey};
use crate::load_balancer::balancer::{BalancerStats, KeyBalancer};
use crate::load_balancer::LoadBalancerError;
use crate::observability::metrics;

type ProviderMap = HashMap<String, Arc<KeyBalancer>>;

/// Provider name → key balancer, swappable as a whole on reload.
#[derive(Debug)]
pub struct KeyPool {
    providers: ArcSwap<ProviderMap>,
}

impl Default for KeyPool {
    fn default() -> Self {
        Self {
            providers: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

impl KeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool from configuration.
    pub fn from_config(configs: &[ProviderConfig]) -> Self {
        let pool = Self::new();
        pool.reconcile(configs);
        pool
    }

    /// Balancer for `provider`.
    pub fn get(&self, provider: &str) -> Result<Arc<KeyBalancer>, LoadBalancerError> {
        self.providers
            .load()
            .get(provider)
            .cloned()
            .ok_or_else(|| LoadBalancerError::UnknownProvider(provider.to_string()))
    }

    /// Select a key for `provider`.
    pub fn get_api_key(&self, provider: &str) -> Result<String, LoadBalancerError> {
        let key = self.get(provider)?.get_api_key()?;
        tracing::debug!(provider = %provider, key = %mask_key(&key), "Selected API key");
        metrics::record_key_selection(provider);
        Ok(key)
    }

    /// Register a provider, replacing any existing one with the same name.
    pub fn insert(&self, provider: impl Into<String>, balancer: KeyBalancer) {
        let provider = provider.into();
        let balancer = Arc::new(balancer);
        self.providers.rcu(|current| {
            let mut next = ProviderMap::clone(current);
            next.insert(provider.clone(), Arc::clone(&balancer));
            next
        });
    }

    /// Provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> BTreeMap<String, BalancerStats> {
        self.providers
            .load()
            .iter()
            .map(|(name, balancer)| (name.clone(), balancer.get_stats()))
            .collect()
    }

    /// Bring the pool in line with `configs`.
    ///
    /// Providers missing from `configs` are dropped, new ones are created and
    /// surviving ones are updated in place via [`KeyBalancer::apply_keys`].
    pub fn reconcile(&self, configs: &[ProviderConfig]) {
        let current = self.providers.load_full();
        let mut next = ProviderMap::with_capacity(configs.len());

        for config in configs {
            let desired: Vec<ApiKey> = config.keys.iter().map(ApiKey::from).collect();
            let balancer = match current.get(&config.name) {
                Some(existing) => {
                    existing.apply_keys(&desired);
                    Arc::clone(existing)
                }
                None => {
                    tracing::info!(
                        provider = %config.name,
                        keys = desired.len(),
                        "Adding provider"
                    );
                    Arc::new(KeyBalancer::with_keys(desired))
                }
            };
            next.insert(config.name.clone(), balancer);
        }

        for name in current.keys().filter(|name| !next.contains_key(*name)) {
            tracing::info!(provider = %name, "Removing provider");
        }

        self.providers.store(Arc::new(next));
    }
}
