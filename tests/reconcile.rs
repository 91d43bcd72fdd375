use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use giftlease::error::BillingError;
use giftlease::models::{AccessState, OrderStatus, PaymentOutcome};
use giftlease::reconcile::{get_entitlement_status, report_outcome, Applied};
use giftlease::store::mem::MemStore;
use giftlease::store::Store;
use giftlease::tiers::{effective_tier, pending_extension_tier, TierKey};

mod support;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

async fn pending_order(store: &MemStore, gift_id: Uuid, amount: i64) -> String {
    let reference = format!("ref-{}", Uuid::new_v4());
    store
        .create_order(gift_id, "payhub", &reference, amount, "USD")
        .await
        .expect("create order");
    reference
}

/// Extension entry plus the order paying for it, as the extend endpoint
/// records them.
async fn pending_extension_order(
    store: &MemStore,
    gift_id: Uuid,
    tier: TierKey,
    amount: i64,
) -> String {
    let reference = format!("ref-{}", Uuid::new_v4());
    store
        .record_pending_extension(gift_id, tier, amount, &reference)
        .await
        .expect("record extension");
    store
        .create_order(gift_id, "payhub", &reference, amount, "USD")
        .await
        .expect("create order");
    reference
}

#[tokio::test]
async fn success_activates_new_gift_at_base_tier() {
    let store = MemStore::new();
    let gift = support::new_gift(None);
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, TierKey::Day.price()).await;

    let res = report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("report");

    assert_eq!(res.status, OrderStatus::Completed);
    assert_eq!(res.applied, Applied::Activated);
    assert!(!res.idempotent);

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(now() + Duration::hours(24)));
    assert_eq!(gift.activated_at, Some(now()));
    assert!(gift.addon_history.is_empty());

    let order = store.orders().into_iter().next().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.paid_at, Some(now()));
}

#[tokio::test]
async fn success_activates_with_selected_week_duration() {
    let store = MemStore::new();
    let gift = support::new_gift(Some(TierKey::Week));
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, TierKey::Week.price()).await;

    report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("report");

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(now() + Duration::hours(168)));
    // Initial duration addon is stamped as applied at activation.
    assert_eq!(gift.addon_history[0].applied_at, Some(now()));
}

#[tokio::test]
async fn live_gift_extension_builds_on_remaining_time() {
    let store = MemStore::new();
    let mut gift = support::new_gift(Some(TierKey::Day));
    gift.activate(now() - Duration::hours(14));
    let gift_id = gift.id;
    let current_expiry = gift.expires_at.unwrap();
    assert_eq!(current_expiry, now() + Duration::hours(10));
    store.insert_gift(gift);

    let reference = pending_extension_order(&store, gift_id, TierKey::ThreeDays, 300).await;

    let res = report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("report");
    assert_eq!(res.applied, Applied::Extended);

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(current_expiry + Duration::hours(72)));
    let ext = gift.addon_history.last().unwrap();
    assert_eq!(ext.applied_at, Some(now()));
}

#[tokio::test]
async fn lapsed_gift_extension_restarts_from_now() {
    let store = MemStore::new();
    let mut gift = support::new_gift(Some(TierKey::Day));
    gift.activate(now() - Duration::hours(29));
    let gift_id = gift.id;
    assert_eq!(gift.expires_at, Some(now() - Duration::hours(5)));
    store.insert_gift(gift);

    let reference = pending_extension_order(&store, gift_id, TierKey::Week, 700).await;

    report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("report");

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(now() + Duration::hours(168)));
}

#[tokio::test]
async fn lifetime_extension_clears_expiry_and_blocks_further_upgrades() {
    let store = MemStore::new();
    let mut gift = support::new_gift(Some(TierKey::Day));
    gift.activate(now() - Duration::hours(1));
    let gift_id = gift.id;
    store.insert_gift(gift);

    let reference = pending_extension_order(&store, gift_id, TierKey::Lifetime, 1500).await;
    report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("report");

    let status = get_entitlement_status(&store, gift_id).await.expect("status");
    assert_eq!(status.access, AccessState::Lifetime);
    assert_eq!(status.effective_tier, TierKey::Lifetime);

    for tier in [TierKey::Day, TierKey::ThreeDays, TierKey::Week, TierKey::Lifetime] {
        let err = store
            .record_pending_extension(gift_id, tier, 100, "ref-rejected")
            .await
            .expect_err("downgrade must be rejected");
        assert!(matches!(err, BillingError::InvalidTier { .. }), "{err}");
    }
}

#[tokio::test]
async fn downgrade_never_changes_state() {
    let store = MemStore::new();
    let gift = support::new_gift(Some(TierKey::Week));
    let gift_id = gift.id;
    store.insert_gift(gift);

    for tier in [TierKey::Day, TierKey::ThreeDays, TierKey::Week] {
        let err = store
            .record_pending_extension(gift_id, tier, 100, "ref-rejected")
            .await
            .expect_err("non-upgrade must be rejected");
        assert!(matches!(err, BillingError::InvalidTier { .. }), "{err}");
    }
    assert_eq!(store.gift(gift_id).unwrap().addon_history.len(), 1);
}

#[tokio::test]
async fn second_pending_extension_is_rejected() {
    let store = MemStore::new();
    let gift = support::new_gift(Some(TierKey::Day));
    let gift_id = gift.id;
    store.insert_gift(gift);

    store
        .record_pending_extension(gift_id, TierKey::ThreeDays, 300, "ref-first")
        .await
        .expect("first extension");
    let err = store
        .record_pending_extension(gift_id, TierKey::Week, 700, "ref-second")
        .await
        .expect_err("second unpaid extension must be rejected");
    assert!(matches!(err, BillingError::ExtensionPending), "{err}");
}

#[tokio::test]
async fn duplicate_success_delivery_is_a_noop() {
    let store = MemStore::new();
    let gift = support::new_gift(None);
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, 499).await;

    let first = report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("first");
    assert_eq!(first.applied, Applied::Activated);

    let later = now() + Duration::hours(3);
    let second = report_outcome(&store, &reference, PaymentOutcome::Success, later)
        .await
        .expect("second");
    assert_eq!(second.status, OrderStatus::Completed);
    assert_eq!(second.applied, Applied::None);
    assert!(second.idempotent);

    // Entitlement unchanged by the redelivery.
    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(now() + Duration::hours(24)));
    assert_eq!(gift.activated_at, Some(now()));
}

#[tokio::test]
async fn redelivered_success_never_applies_another_orders_extension() {
    let store = MemStore::new();
    let gift = support::new_gift(Some(TierKey::Day));
    let gift_id = gift.id;
    store.insert_gift(gift);

    let activation_ref = pending_order(&store, gift_id, 499).await;
    report_outcome(&store, &activation_ref, PaymentOutcome::Success, now())
        .await
        .expect("activate");
    let expiry = store.gift(gift_id).unwrap().expires_at;

    // An upgrade is recorded afterwards but its own order stays unpaid.
    pending_extension_order(&store, gift_id, TierKey::Week, 700).await;

    let later = now() + Duration::hours(1);
    let res = report_outcome(&store, &activation_ref, PaymentOutcome::Success, later)
        .await
        .expect("redelivery");
    assert_eq!(res.applied, Applied::None);
    assert!(res.idempotent);

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, expiry, "one payment must not apply twice");
    assert_eq!(
        pending_extension_tier(&gift.addon_history),
        Some(TierKey::Week),
        "the unpaid extension stays recorded for its own order"
    );
}

#[tokio::test]
async fn failed_extension_clears_pending_entry_and_allows_retry() {
    let store = MemStore::new();
    let mut gift = support::new_gift(Some(TierKey::Day));
    gift.activate(now() - Duration::hours(1));
    let gift_id = gift.id;
    let expiry = gift.expires_at;
    store.insert_gift(gift);

    let reference = pending_extension_order(&store, gift_id, TierKey::ThreeDays, 300).await;
    let res = report_outcome(&store, &reference, PaymentOutcome::Failed, now())
        .await
        .expect("failed report");
    assert_eq!(res.status, OrderStatus::Failed);

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(pending_extension_tier(&gift.addon_history), None);
    assert_eq!(effective_tier(&gift.addon_history), TierKey::Day);
    assert_eq!(gift.expires_at, expiry);

    // The gift is open for a new upgrade right away.
    let retry = pending_extension_order(&store, gift_id, TierKey::Week, 700).await;
    let res = report_outcome(&store, &retry, PaymentOutcome::Success, now())
        .await
        .expect("retry success");
    assert_eq!(res.applied, Applied::Extended);
    let gift = store.gift(gift_id).unwrap();
    assert_eq!(effective_tier(&gift.addon_history), TierKey::Week);
}

#[tokio::test]
async fn cancelled_extension_clears_pending_entry() {
    let store = MemStore::new();
    let mut gift = support::new_gift(Some(TierKey::Day));
    gift.activate(now() - Duration::hours(1));
    let gift_id = gift.id;
    store.insert_gift(gift);

    let reference = pending_extension_order(&store, gift_id, TierKey::Week, 700).await;
    report_outcome(&store, &reference, PaymentOutcome::Cancelled, now())
        .await
        .expect("cancelled report");

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(pending_extension_tier(&gift.addon_history), None);
    store
        .record_pending_extension(gift_id, TierKey::ThreeDays, 300, "ref-retry")
        .await
        .expect("retry after cancellation");
}

#[tokio::test]
async fn success_after_failure_stays_failed() {
    let store = MemStore::new();
    let gift = support::new_gift(None);
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, 499).await;

    let failed = report_outcome(&store, &reference, PaymentOutcome::Failed, now())
        .await
        .expect("failed report");
    assert_eq!(failed.status, OrderStatus::Failed);

    let res = report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("late success");
    assert_eq!(res.status, OrderStatus::Failed);
    assert_eq!(res.applied, Applied::None);
    assert!(res.idempotent);
    assert_eq!(store.gift(gift_id).unwrap().activated_at, None);
}

#[tokio::test]
async fn cancelled_outcome_marks_order_cancelled() {
    let store = MemStore::new();
    let gift = support::new_gift(None);
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, 499).await;

    let res = report_outcome(&store, &reference, PaymentOutcome::Cancelled, now())
        .await
        .expect("cancelled report");
    assert_eq!(res.status, OrderStatus::Cancelled);
    assert_eq!(store.gift(gift_id).unwrap().activated_at, None);
}

#[tokio::test]
async fn unknown_reference_is_an_error() {
    let store = MemStore::new();
    let err = report_outcome(&store, "no-such-ref", PaymentOutcome::Success, now())
        .await
        .expect_err("must fail");
    assert!(matches!(err, BillingError::OrderNotFound), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_success_reports_apply_entitlement_once() {
    let store = Arc::new(MemStore::new());
    let gift = support::new_gift(None);
    let gift_id = gift.id;
    store.insert_gift(gift);
    let reference = pending_order(&store, gift_id, 499).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            report_outcome(store.as_ref(), &reference, PaymentOutcome::Success, now()).await
        }));
    }

    let mut activations = 0;
    for handle in handles {
        let res = handle.await.expect("join").expect("report");
        assert_eq!(res.status, OrderStatus::Completed);
        if res.applied == Applied::Activated {
            activations += 1;
        }
    }
    assert_eq!(activations, 1);

    let gift = store.gift(gift_id).unwrap();
    assert_eq!(gift.expires_at, Some(now() + Duration::hours(24)));
}

#[tokio::test]
async fn expiry_only_moves_later() {
    let store = MemStore::new();
    let gift = support::new_gift(Some(TierKey::Day));
    let gift_id = gift.id;
    store.insert_gift(gift);

    let reference = pending_order(&store, gift_id, 499).await;
    report_outcome(&store, &reference, PaymentOutcome::Success, now())
        .await
        .expect("activate");
    let mut expiries = vec![store.gift(gift_id).unwrap().expires_at.unwrap()];

    for (tier, at) in [
        (TierKey::ThreeDays, now() + Duration::hours(1)),
        (TierKey::Week, now() + Duration::hours(2)),
    ] {
        let reference = pending_extension_order(&store, gift_id, tier, 100).await;
        report_outcome(&store, &reference, PaymentOutcome::Success, at)
            .await
            .expect("extend");
        expiries.push(store.gift(gift_id).unwrap().expires_at.unwrap());
    }

    for pair in expiries.windows(2) {
        assert!(pair[1] > pair[0], "expiry must never move earlier");
    }
}
