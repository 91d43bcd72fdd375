// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BillingError;
use crate::lease::compute_new_expiry;
use crate::tiers::{effective_tier, pending_extension_tier, TierKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    /// Initially selected access duration, recorded at gift creation.
    Duration,
    /// A later upgrade to a higher tier.
    Extension,
}

/// One entry of a gift's addon history. `applied_at == None` means the
/// addon is charged for but not yet reflected in the expiry; it is set
/// exactly once, atomically with the expiry update. Extension entries
/// carry the reference of the order paying for them, so a confirmation
/// can only ever apply the entry it actually paid for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonEvent {
    pub kind: AddonKind,
    pub tier: TierKey,
    pub price: i64,
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
}

/// Access state derived from `activated_at` + `expires_at`. Keeping the
/// activation marker separate from the expiry is what distinguishes a
/// lifetime gift from one that simply has not been paid for yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessState {
    NotActivated,
    ExpiresAt { at: DateTime<Utc> },
    Lifetime,
}

#[derive(Debug, Clone)]
pub struct Gift {
    pub id: Uuid,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub addon_history: Vec<AddonEvent>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Gift {
    pub fn access_state(&self) -> AccessState {
        match (self.activated_at, self.expires_at) {
            (None, _) => AccessState::NotActivated,
            (Some(_), None) => AccessState::Lifetime,
            (Some(_), Some(at)) => AccessState::ExpiresAt { at },
        }
    }

    /// First activation after the initial payment. Resolves the gift's
    /// initially selected duration tier from its history (base tier if
    /// none recorded) and writes the first expiry. Returns `false` if
    /// the gift is already activated, so redundant delivery is a no-op.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        if self.activated_at.is_some() {
            return false;
        }
        let tier = self
            .addon_history
            .iter()
            .find(|e| e.kind == AddonKind::Duration)
            .map(|e| e.tier)
            .unwrap_or(TierKey::BASE);

        self.expires_at = compute_new_expiry(None, tier, now);
        self.activated_at = Some(now);
        if let Some(ev) = self
            .addon_history
            .iter_mut()
            .find(|e| e.kind == AddonKind::Duration && e.applied_at.is_none())
        {
            ev.applied_at = Some(now);
        }
        true
    }

    /// Applies the unpaid extension recorded under `order_reference`,
    /// moving the expiry later (or to lifetime) and stamping the entry
    /// in one step. Returns `false` when no such pending entry exists:
    /// already applied, never recorded, or recorded for a different
    /// order. All three are safe under at-least-once delivery.
    pub fn apply_pending_extension(&mut self, order_reference: &str, now: DateTime<Utc>) -> bool {
        let Some(ev) = self.addon_history.iter_mut().find(|e| {
            e.kind == AddonKind::Extension
                && e.applied_at.is_none()
                && e.order_reference.as_deref() == Some(order_reference)
        }) else {
            return false;
        };
        let tier = ev.tier;
        ev.applied_at = Some(now);
        self.expires_at = compute_new_expiry(self.expires_at, tier, now);
        true
    }

    /// Records an extension at payment-initiation time, before the
    /// charge confirms. Rejects anything that is not a strict upgrade,
    /// and a second extension while one is still unpaid.
    pub fn record_extension(
        &mut self,
        tier: TierKey,
        price: i64,
        order_reference: &str,
    ) -> Result<(), BillingError> {
        if pending_extension_tier(&self.addon_history).is_some() {
            return Err(BillingError::ExtensionPending);
        }
        let current = effective_tier(&self.addon_history);
        if tier.rank() <= current.rank() {
            return Err(BillingError::InvalidTier {
                current,
                requested: tier,
            });
        }
        self.addon_history.push(AddonEvent {
            kind: AddonKind::Extension,
            tier,
            price,
            applied_at: None,
            order_reference: Some(order_reference.to_string()),
        });
        Ok(())
    }

    /// Drops the unpaid extension recorded under `order_reference`,
    /// reopening the gift for a new upgrade after its payment failed or
    /// was cancelled. Returns `false` when no such entry exists.
    pub fn clear_pending_extension(&mut self, order_reference: &str) -> bool {
        let before = self.addon_history.len();
        self.addon_history.retain(|e| {
            !(e.kind == AddonKind::Extension
                && e.applied_at.is_none()
                && e.order_reference.as_deref() == Some(order_reference))
        });
        self.addon_history.len() != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// One initiated charge. `provider_reference` is the external id shared
/// with the payment provider; webhooks and verify polls only know this.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i32,
    pub gift_id: Uuid,
    pub provider: String,
    pub provider_reference: String,
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Normalized outcome reported by any confirmation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failed,
    Cancelled,
}
