pub mod api;
pub mod db;
pub mod docs;
pub mod error;
pub mod lease;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod tiers;

use std::collections::HashSet;
use std::sync::Arc;

use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub provider_api_key: String,
    pub webhook_key: String,
    pub currency: String,
    pub bypass: BypassPolicy,
}

/// Capability check for the dev-bypass channel: a caller presenting an
/// allowed key may create a zero-price order and immediately complete
/// it. Handlers consult this policy, never an inline list.
#[derive(Clone, Default)]
pub struct BypassPolicy {
    allowed: Arc<HashSet<String>>,
}

impl BypassPolicy {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: Arc::new(keys.into_iter().collect()),
        }
    }

    /// Comma-separated keys from `DEV_BYPASS_KEYS`; unset = nobody.
    pub fn from_env() -> Self {
        let keys = std::env::var("DEV_BYPASS_KEYS").unwrap_or_default();
        Self::new(
            keys.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn allows(&self, caller_key: &str) -> bool {
        !caller_key.is_empty() && self.allowed.contains(caller_key)
    }
}
