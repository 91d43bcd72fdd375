// src/lease.rs

use chrono::{DateTime, Duration, Utc};

use crate::tiers::TierKey;

/// Computes the expiry a gift gets after paying for `tier`.
///
/// `None` = lifetime. A still-live lease is extended from its remaining
/// time; a lapsed one restarts from `now`, with no back-pay for the gap.
/// Deterministic and side-effect-free: this is called from every
/// reconciliation channel and must behave identically in all of them.
pub fn compute_new_expiry(
    current_expires_at: Option<DateTime<Utc>>,
    tier: TierKey,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let hours = tier.duration_hours()?;
    let base = match current_expires_at {
        Some(t) if t > now => t,
        _ => now,
    };
    Some(base + Duration::hours(hours))
}
