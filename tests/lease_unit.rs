use chrono::{DateTime, Duration, TimeZone, Utc};

use giftlease::lease::compute_new_expiry;
use giftlease::models::{AddonEvent, AddonKind};
use giftlease::tiers::{
    effective_tier, incremental_price, pending_extension_tier, TierKey,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn extension(tier: TierKey, applied: bool) -> AddonEvent {
    AddonEvent {
        kind: AddonKind::Extension,
        tier,
        price: tier.price(),
        applied_at: applied.then(now),
        order_reference: Some(format!("ref-{tier}")),
    }
}

fn duration(tier: TierKey) -> AddonEvent {
    AddonEvent {
        kind: AddonKind::Duration,
        tier,
        price: tier.price(),
        applied_at: None,
        order_reference: None,
    }
}

#[test]
fn initial_activation_bases_on_now() {
    let expiry = compute_new_expiry(None, TierKey::Day, now());
    assert_eq!(expiry, Some(now() + Duration::hours(24)));
}

#[test]
fn live_gift_extends_from_remaining_time() {
    let current = now() + Duration::hours(10);
    let expiry = compute_new_expiry(Some(current), TierKey::ThreeDays, now());
    assert_eq!(expiry, Some(current + Duration::hours(72)));
}

#[test]
fn lapsed_gift_extends_from_now_without_back_pay() {
    let stale = now() - Duration::hours(5);
    let expiry = compute_new_expiry(Some(stale), TierKey::Week, now());
    assert_eq!(expiry, Some(now() + Duration::hours(168)));
}

#[test]
fn lifetime_has_no_expiry() {
    assert_eq!(compute_new_expiry(None, TierKey::Lifetime, now()), None);
    let current = now() + Duration::hours(10);
    assert_eq!(
        compute_new_expiry(Some(current), TierKey::Lifetime, now()),
        None
    );
}

#[test]
fn tier_ranks_are_strictly_ordered() {
    let tiers = [
        TierKey::Day,
        TierKey::ThreeDays,
        TierKey::Week,
        TierKey::Lifetime,
    ];
    for pair in tiers.windows(2) {
        assert!(pair[0].rank() < pair[1].rank());
    }
}

#[test]
fn tier_keys_round_trip() {
    for tier in [
        TierKey::Day,
        TierKey::ThreeDays,
        TierKey::Week,
        TierKey::Lifetime,
    ] {
        assert_eq!(TierKey::parse(tier.as_str()), Some(tier));
    }
    assert_eq!(TierKey::parse("2w"), None);
}

#[test]
fn incremental_price_is_the_difference() {
    assert_eq!(
        incremental_price(TierKey::Day, TierKey::Week),
        TierKey::Week.price() - TierKey::Day.price()
    );
}

#[test]
fn incremental_price_never_negative() {
    assert_eq!(incremental_price(TierKey::Week, TierKey::Day), 0);
}

#[test]
fn effective_tier_defaults_to_base() {
    assert_eq!(effective_tier(&[]), TierKey::Day);
}

#[test]
fn effective_tier_uses_initial_duration() {
    let history = vec![duration(TierKey::Week)];
    assert_eq!(effective_tier(&history), TierKey::Week);
}

#[test]
fn effective_tier_prefers_latest_extension_even_pending() {
    let history = vec![
        duration(TierKey::Day),
        extension(TierKey::ThreeDays, true),
        extension(TierKey::Week, false),
    ];
    assert_eq!(effective_tier(&history), TierKey::Week);
}

#[test]
fn pending_extension_ignores_applied_entries() {
    let history = vec![duration(TierKey::Day), extension(TierKey::ThreeDays, true)];
    assert_eq!(pending_extension_tier(&history), None);

    let history = vec![duration(TierKey::Day), extension(TierKey::ThreeDays, false)];
    assert_eq!(pending_extension_tier(&history), Some(TierKey::ThreeDays));
}
