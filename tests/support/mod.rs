#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use giftlease::models::{AddonEvent, AddonKind, Gift};
use giftlease::store::mem::MemStore;
use giftlease::tiers::TierKey;
use giftlease::{AppState, BypassPolicy};

/// Fresh gift, optionally carrying an initially selected duration tier.
pub fn new_gift(initial_tier: Option<TierKey>) -> Gift {
    let mut addon_history = Vec::new();
    if let Some(tier) = initial_tier {
        addon_history.push(AddonEvent {
            kind: AddonKind::Duration,
            tier,
            price: tier.price(),
            applied_at: None,
            order_reference: None,
        });
    }
    Gift {
        id: Uuid::new_v4(),
        activated_at: None,
        expires_at: None,
        addon_history,
        created_at: Some(Utc::now()),
    }
}

pub fn build_state(store: MemStore, webhook_key: &str, dev_keys: &[&str]) -> AppState {
    AppState {
        store: Arc::new(store),
        provider_api_key: "test-provider".to_string(),
        webhook_key: webhook_key.to_string(),
        currency: "USD".to_string(),
        bypass: BypassPolicy::new(dev_keys.iter().map(|s| s.to_string())),
    }
}
