// src/db.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{AddonEvent, Gift, Order, OrderStatus};
use crate::store::Store;
use crate::tiers::TierKey;

/// Postgres-backed store. The pending->terminal order transition is a
/// conditional `UPDATE ... WHERE status = 'pending'`; gift updates run
/// inside a transaction with `SELECT ... FOR UPDATE`, so concurrent
/// reconciliation channels serialize on the row.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_gift(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        gift_id: Uuid,
    ) -> Result<Gift, BillingError> {
        let row = sqlx::query(
            r#"SELECT id, activated_at, expires_at, addon_history, created_at
               FROM gifts
               WHERE id = $1
               FOR UPDATE"#,
        )
        .bind(gift_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(gift_from_row).ok_or(BillingError::GiftNotFound)
    }

    async fn write_gift(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        gift: &Gift,
    ) -> Result<(), BillingError> {
        sqlx::query(
            r#"UPDATE gifts
               SET activated_at = $1, expires_at = $2, addon_history = $3
               WHERE id = $4"#,
        )
        .bind(gift.activated_at)
        .bind(gift.expires_at)
        .bind(Json(&gift.addon_history))
        .bind(gift.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn mark(
        &self,
        order_id: i32,
        to: OrderStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, BillingError> {
        let result = sqlx::query(
            r#"UPDATE orders
               SET status = $1, paid_at = COALESCE($2, paid_at)
               WHERE id = $3 AND status = 'pending'"#,
        )
        .bind(to.as_str())
        .bind(paid_at)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn gift_from_row(r: PgRow) -> Gift {
    let history: Json<Vec<AddonEvent>> = r.get("addon_history");
    Gift {
        id: r.get("id"),
        activated_at: r.get("activated_at"),
        expires_at: r.get("expires_at"),
        addon_history: history.0,
        created_at: r.get("created_at"),
    }
}

fn order_from_row(r: PgRow) -> Result<Order, BillingError> {
    let status: String = r.get("status");
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown order status: {status}").into()))?;
    Ok(Order {
        id: r.get("id"),
        gift_id: r.get("gift_id"),
        provider: r.get("provider"),
        provider_reference: r.get("provider_reference"),
        amount: r.get("amount"),
        currency: r.get("currency"),
        status,
        paid_at: r.get("paid_at"),
        created_at: r.get("created_at"),
    })
}

const ORDER_COLUMNS: &str =
    "id, gift_id, provider, provider_reference, amount, currency, status, paid_at, created_at";

#[async_trait]
impl Store for PgStore {
    async fn get_gift(&self, gift_id: Uuid) -> Result<Option<Gift>, BillingError> {
        let row = sqlx::query(
            r#"SELECT id, activated_at, expires_at, addon_history, created_at
               FROM gifts
               WHERE id = $1"#,
        )
        .bind(gift_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(gift_from_row))
    }

    async fn activate_initial(
        &self,
        gift_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let mut tx = self.pool.begin().await?;
        let mut gift = self.lock_gift(&mut tx, gift_id).await?;
        if !gift.activate(now) {
            return Ok(false);
        }
        self.write_gift(&mut tx, &gift).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_pending_extension(
        &self,
        gift_id: Uuid,
        order_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let mut tx = self.pool.begin().await?;
        let mut gift = self.lock_gift(&mut tx, gift_id).await?;
        if !gift.apply_pending_extension(order_reference, now) {
            return Ok(false);
        }
        self.write_gift(&mut tx, &gift).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_pending_extension(
        &self,
        gift_id: Uuid,
        tier: TierKey,
        price: i64,
        order_reference: &str,
    ) -> Result<(), BillingError> {
        let mut tx = self.pool.begin().await?;
        let mut gift = self.lock_gift(&mut tx, gift_id).await?;
        gift.record_extension(tier, price, order_reference)?;
        self.write_gift(&mut tx, &gift).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_pending_extension(
        &self,
        gift_id: Uuid,
        order_reference: &str,
    ) -> Result<bool, BillingError> {
        let mut tx = self.pool.begin().await?;
        let mut gift = self.lock_gift(&mut tx, gift_id).await?;
        if !gift.clear_pending_extension(order_reference) {
            return Ok(false);
        }
        self.write_gift(&mut tx, &gift).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn create_order(
        &self,
        gift_id: Uuid,
        provider: &str,
        provider_reference: &str,
        amount: i64,
        currency: &str,
    ) -> Result<Order, BillingError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO orders (gift_id, provider, provider_reference, amount, currency, status)
               VALUES ($1, $2, $3, $4, $5, 'pending')
               RETURNING {ORDER_COLUMNS}"#
        ))
        .bind(gift_id)
        .bind(provider)
        .bind(provider_reference)
        .bind(amount)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;

        order_from_row(row)
    }

    async fn get_order(&self, order_id: i32) -> Result<Option<Order>, BillingError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn find_order_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Order>, BillingError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE provider_reference = $1"
        ))
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn mark_completed(
        &self,
        order_id: i32,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        self.mark(order_id, OrderStatus::Completed, Some(paid_at))
            .await
    }

    async fn mark_failed(&self, order_id: i32) -> Result<bool, BillingError> {
        self.mark(order_id, OrderStatus::Failed, None).await
    }

    async fn mark_cancelled(&self, order_id: i32) -> Result<bool, BillingError> {
        self.mark(order_id, OrderStatus::Cancelled, None).await
    }
}
