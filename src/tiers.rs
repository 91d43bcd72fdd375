// src/tiers.rs
//
// Static tier catalog: each access tier maps to a duration and a price
// (minor units). The ordering 24h < 3d < 1w < lifetime is what makes
// "upgrade only" enforceable.

use serde::{Deserialize, Serialize};

use crate::models::{AddonEvent, AddonKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierKey {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "lifetime")]
    Lifetime,
}

impl TierKey {
    /// Default tier for gifts whose history carries no duration addon.
    pub const BASE: TierKey = TierKey::Day;

    pub fn parse(s: &str) -> Option<TierKey> {
        match s {
            "24h" => Some(TierKey::Day),
            "3d" => Some(TierKey::ThreeDays),
            "1w" => Some(TierKey::Week),
            "lifetime" => Some(TierKey::Lifetime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierKey::Day => "24h",
            TierKey::ThreeDays => "3d",
            TierKey::Week => "1w",
            TierKey::Lifetime => "lifetime",
        }
    }

    /// Position in the tier ordering. Extensions must strictly increase it.
    pub fn rank(&self) -> u8 {
        match self {
            TierKey::Day => 0,
            TierKey::ThreeDays => 1,
            TierKey::Week => 2,
            TierKey::Lifetime => 3,
        }
    }

    /// `None` = no expiry.
    pub fn duration_hours(&self) -> Option<i64> {
        match self {
            TierKey::Day => Some(24),
            TierKey::ThreeDays => Some(72),
            TierKey::Week => Some(168),
            TierKey::Lifetime => None,
        }
    }

    /// Full price in minor units.
    pub fn price(&self) -> i64 {
        match self {
            TierKey::Day => 499,
            TierKey::ThreeDays => 799,
            TierKey::Week => 1199,
            TierKey::Lifetime => 1999,
        }
    }
}

impl std::fmt::Display for TierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an upgrade from `from` to `to` costs. Clamped at zero so an
/// inconsistent price-table edit can never produce a negative charge.
pub fn incremental_price(from: TierKey, to: TierKey) -> i64 {
    (to.price() - from.price()).max(0)
}

/// Current effective tier of a gift, derived from its addon history:
/// the most recent extension (pending counts as selected), else the
/// initially chosen duration, else the base tier.
pub fn effective_tier(history: &[AddonEvent]) -> TierKey {
    if let Some(ev) = history.iter().rev().find(|e| e.kind == AddonKind::Extension) {
        return ev.tier;
    }
    history
        .iter()
        .find(|e| e.kind == AddonKind::Duration)
        .map(|e| e.tier)
        .unwrap_or(TierKey::BASE)
}

/// Tier of the not-yet-applied extension, if one is waiting for payment.
pub fn pending_extension_tier(history: &[AddonEvent]) -> Option<TierKey> {
    history
        .iter()
        .find(|e| e.kind == AddonKind::Extension && e.applied_at.is_none())
        .map(|e| e.tier)
}
