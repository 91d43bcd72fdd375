// src/reconcile.rs
//
// Single entry point for all four confirmation channels (provider
// webhook, client return-redirect confirm, manual verify poll, dev
// bypass). Channels differ only in transport; none of them carries its
// own state-mutation logic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{AccessState, AddonKind, Order, OrderStatus, PaymentOutcome};
use crate::store::Store;
use crate::tiers::{effective_tier, TierKey};

/// Which entitlement change the call performed, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Applied {
    None,
    Activated,
    Extended,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub order_id: i32,
    pub status: OrderStatus,
    pub applied: Applied,
    /// True when the order was already terminal and this call changed
    /// nothing; the signal was a redundant redelivery.
    pub idempotent: bool,
}

/// Applies a provider-confirmed outcome to the order with this
/// reference, exactly once. Any channel may call this any number of
/// times with the same signal; only the call that wins the
/// pending->terminal transition performs entitlement side effects.
///
/// Never retries on its own: delivery failures are the channels'
/// problem (webhook redelivery, poll on page load, manual confirm).
pub async fn report_outcome(
    store: &dyn Store,
    provider_reference: &str,
    outcome: PaymentOutcome,
    now: DateTime<Utc>,
) -> Result<ReconcileResult, BillingError> {
    let order = store
        .find_order_by_reference(provider_reference)
        .await?
        .ok_or(BillingError::OrderNotFound)?;

    if order.status.is_terminal() {
        // Redelivery. Re-run only the side effects belonging to THIS
        // order: a completed one its entitlement step, a failed or
        // cancelled one the removal of its unpaid extension entry. If a
        // crash hit between the status transition and the side effect,
        // this repairs it; otherwise the per-order guards make it a
        // no-op. Entries paid for by other orders are never touched.
        let applied = if order.status == OrderStatus::Completed
            && outcome == PaymentOutcome::Success
        {
            apply_entitlement(store, &order, now).await?
        } else {
            if order.status != OrderStatus::Completed {
                store
                    .clear_pending_extension(order.gift_id, &order.provider_reference)
                    .await?;
            }
            Applied::None
        };
        return Ok(ReconcileResult {
            order_id: order.id,
            status: order.status,
            applied,
            idempotent: true,
        });
    }

    match outcome {
        PaymentOutcome::Failed => {
            if !store.mark_failed(order.id).await? {
                return lost_race(store, &order).await;
            }
            clear_dead_extension(store, &order).await?;
            log::info!("order {} marked failed ref={}", order.id, provider_reference);
            Ok(ReconcileResult {
                order_id: order.id,
                status: OrderStatus::Failed,
                applied: Applied::None,
                idempotent: false,
            })
        }
        PaymentOutcome::Cancelled => {
            if !store.mark_cancelled(order.id).await? {
                return lost_race(store, &order).await;
            }
            clear_dead_extension(store, &order).await?;
            log::info!(
                "order {} marked cancelled ref={}",
                order.id,
                provider_reference
            );
            Ok(ReconcileResult {
                order_id: order.id,
                status: OrderStatus::Cancelled,
                applied: Applied::None,
                idempotent: false,
            })
        }
        PaymentOutcome::Success => {
            if !store.mark_completed(order.id, now).await? {
                // Another channel won the transition and applies the
                // entitlement effects.
                return lost_race(store, &order).await;
            }
            let applied = apply_entitlement(store, &order, now).await?;
            log::info!(
                "order {} completed ref={} applied={:?}",
                order.id,
                provider_reference,
                applied
            );
            Ok(ReconcileResult {
                order_id: order.id,
                status: OrderStatus::Completed,
                applied,
                idempotent: false,
            })
        }
    }
}

/// A completed order applies exactly the entitlement it paid for: the
/// unpaid extension entry recorded under its reference if one exists,
/// otherwise the gift's initial activation. An unpaid extension owned
/// by a different order is not this payment's to apply.
async fn apply_entitlement(
    store: &dyn Store,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<Applied, BillingError> {
    let gift = store
        .get_gift(order.gift_id)
        .await?
        .ok_or(BillingError::GiftNotFound)?;

    let owns_pending = gift.addon_history.iter().any(|e| {
        e.kind == AddonKind::Extension
            && e.applied_at.is_none()
            && e.order_reference.as_deref() == Some(order.provider_reference.as_str())
    });
    if owns_pending {
        if store
            .apply_pending_extension(order.gift_id, &order.provider_reference, now)
            .await?
        {
            return Ok(Applied::Extended);
        }
        return Ok(Applied::None);
    }

    if store.activate_initial(order.gift_id, now).await? {
        Ok(Applied::Activated)
    } else {
        Ok(Applied::None)
    }
}

/// A failed or cancelled order takes its own unpaid extension entry
/// with it, so the gift is immediately open for a retry.
async fn clear_dead_extension(store: &dyn Store, order: &Order) -> Result<(), BillingError> {
    if store
        .clear_pending_extension(order.gift_id, &order.provider_reference)
        .await?
    {
        log::info!(
            "order {} dropped unpaid extension ref={}",
            order.id,
            order.provider_reference
        );
    }
    Ok(())
}

async fn lost_race(store: &dyn Store, order: &Order) -> Result<ReconcileResult, BillingError> {
    let status = store
        .get_order(order.id)
        .await?
        .map(|o| o.status)
        .unwrap_or(order.status);
    Ok(ReconcileResult {
        order_id: order.id,
        status,
        applied: Applied::None,
        idempotent: true,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitlementStatus {
    #[serde(flatten)]
    pub access: AccessState,
    pub effective_tier: TierKey,
}

/// Read surface for the UI layer.
pub async fn get_entitlement_status(
    store: &dyn Store,
    gift_id: Uuid,
) -> Result<EntitlementStatus, BillingError> {
    let gift = store
        .get_gift(gift_id)
        .await?
        .ok_or(BillingError::GiftNotFound)?;
    Ok(EntitlementStatus {
        access: gift.access_state(),
        effective_tier: effective_tier(&gift.addon_history),
    })
}
