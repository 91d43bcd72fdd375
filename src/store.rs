// src/store.rs
//
// Persistence seam for the two logical collections this core owns:
// gifts (expiry + addon history) and orders. The Postgres implementation
// lives in `db.rs`; `mem` below is an in-memory implementation used by
// the tests. Every state-changing method checks current state and writes
// in one atomic step, so a duplicate call after a successful one is a
// no-op. That is what keeps four un-synchronized confirmation channels
// safe without a distributed lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{Gift, Order};
use crate::tiers::TierKey;

#[async_trait]
pub trait Store: Send + Sync {
    // Gifts / entitlements

    async fn get_gift(&self, gift_id: Uuid) -> Result<Option<Gift>, BillingError>;

    /// First activation; `Ok(false)` when the gift is already activated.
    async fn activate_initial(
        &self,
        gift_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError>;

    /// Applies the pending extension recorded under `order_reference`;
    /// `Ok(false)` when there is none (already applied, never recorded,
    /// or recorded for a different order).
    async fn apply_pending_extension(
        &self,
        gift_id: Uuid,
        order_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError>;

    /// Appends an unpaid extension event tied to the order with
    /// `order_reference`. Fails with `InvalidTier` on a non-upgrade
    /// request and `ExtensionPending` if one is already waiting for
    /// payment.
    async fn record_pending_extension(
        &self,
        gift_id: Uuid,
        tier: TierKey,
        price: i64,
        order_reference: &str,
    ) -> Result<(), BillingError>;

    /// Drops the unpaid extension recorded under `order_reference` after
    /// its payment failed or was cancelled; `Ok(false)` when there is
    /// nothing to drop.
    async fn clear_pending_extension(
        &self,
        gift_id: Uuid,
        order_reference: &str,
    ) -> Result<bool, BillingError>;

    // Order ledger

    async fn create_order(
        &self,
        gift_id: Uuid,
        provider: &str,
        provider_reference: &str,
        amount: i64,
        currency: &str,
    ) -> Result<Order, BillingError>;

    async fn get_order(&self, order_id: i32) -> Result<Option<Order>, BillingError>;

    async fn find_order_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Order>, BillingError>;

    /// pending -> completed, conditionally. `Ok(false)` means the order
    /// was already terminal; the caller must skip all side effects.
    async fn mark_completed(
        &self,
        order_id: i32,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, BillingError>;

    /// Same contract as [`Store::mark_completed`].
    async fn mark_failed(&self, order_id: i32) -> Result<bool, BillingError>;

    /// Same contract as [`Store::mark_completed`].
    async fn mark_cancelled(&self, order_id: i32) -> Result<bool, BillingError>;
}

/// In-memory store for tests. One mutex over all state stands in for the
/// database's conditional updates, so the idempotency guards are exercised
/// exactly as they would be against Postgres.
pub mod mem {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::OrderStatus;

    #[derive(Default, Clone)]
    pub struct MemStore {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        gifts: HashMap<Uuid, Gift>,
        orders: Vec<Order>,
        next_order_id: i32,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_gift(&self, gift: Gift) {
            self.inner.lock().unwrap().gifts.insert(gift.id, gift);
        }

        /// Snapshot for assertions.
        pub fn gift(&self, gift_id: Uuid) -> Option<Gift> {
            self.inner.lock().unwrap().gifts.get(&gift_id).cloned()
        }

        /// Snapshot for assertions.
        pub fn orders(&self) -> Vec<Order> {
            self.inner.lock().unwrap().orders.clone()
        }

        fn mark(&self, order_id: i32, to: OrderStatus, paid_at: Option<DateTime<Utc>>) -> bool {
            let mut inner = self.inner.lock().unwrap();
            let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) else {
                return false;
            };
            if order.status != OrderStatus::Pending {
                return false;
            }
            order.status = to;
            order.paid_at = paid_at;
            true
        }
    }

    #[async_trait]
    impl Store for MemStore {
        async fn get_gift(&self, gift_id: Uuid) -> Result<Option<Gift>, BillingError> {
            Ok(self.gift(gift_id))
        }

        async fn activate_initial(
            &self,
            gift_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<bool, BillingError> {
            let mut inner = self.inner.lock().unwrap();
            let gift = inner
                .gifts
                .get_mut(&gift_id)
                .ok_or(BillingError::GiftNotFound)?;
            Ok(gift.activate(now))
        }

        async fn apply_pending_extension(
            &self,
            gift_id: Uuid,
            order_reference: &str,
            now: DateTime<Utc>,
        ) -> Result<bool, BillingError> {
            let mut inner = self.inner.lock().unwrap();
            let gift = inner
                .gifts
                .get_mut(&gift_id)
                .ok_or(BillingError::GiftNotFound)?;
            Ok(gift.apply_pending_extension(order_reference, now))
        }

        async fn record_pending_extension(
            &self,
            gift_id: Uuid,
            tier: TierKey,
            price: i64,
            order_reference: &str,
        ) -> Result<(), BillingError> {
            let mut inner = self.inner.lock().unwrap();
            let gift = inner
                .gifts
                .get_mut(&gift_id)
                .ok_or(BillingError::GiftNotFound)?;
            gift.record_extension(tier, price, order_reference)
        }

        async fn clear_pending_extension(
            &self,
            gift_id: Uuid,
            order_reference: &str,
        ) -> Result<bool, BillingError> {
            let mut inner = self.inner.lock().unwrap();
            let gift = inner
                .gifts
                .get_mut(&gift_id)
                .ok_or(BillingError::GiftNotFound)?;
            Ok(gift.clear_pending_extension(order_reference))
        }

        async fn create_order(
            &self,
            gift_id: Uuid,
            provider: &str,
            provider_reference: &str,
            amount: i64,
            currency: &str,
        ) -> Result<Order, BillingError> {
            let mut inner = self.inner.lock().unwrap();
            inner.next_order_id += 1;
            let order = Order {
                id: inner.next_order_id,
                gift_id,
                provider: provider.to_string(),
                provider_reference: provider_reference.to_string(),
                amount,
                currency: currency.to_string(),
                status: OrderStatus::Pending,
                paid_at: None,
                created_at: Some(Utc::now()),
            };
            inner.orders.push(order.clone());
            Ok(order)
        }

        async fn get_order(&self, order_id: i32) -> Result<Option<Order>, BillingError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.orders.iter().find(|o| o.id == order_id).cloned())
        }

        async fn find_order_by_reference(
            &self,
            provider_reference: &str,
        ) -> Result<Option<Order>, BillingError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .orders
                .iter()
                .find(|o| o.provider_reference == provider_reference)
                .cloned())
        }

        async fn mark_completed(
            &self,
            order_id: i32,
            paid_at: DateTime<Utc>,
        ) -> Result<bool, BillingError> {
            Ok(self.mark(order_id, OrderStatus::Completed, Some(paid_at)))
        }

        async fn mark_failed(&self, order_id: i32) -> Result<bool, BillingError> {
            Ok(self.mark(order_id, OrderStatus::Failed, None))
        }

        async fn mark_cancelled(&self, order_id: i32) -> Result<bool, BillingError> {
            Ok(self.mark(order_id, OrderStatus::Cancelled, None))
        }
    }
}
