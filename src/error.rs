// src/error.rs

use std::fmt;

use crate::tiers::TierKey;

#[derive(Debug)]
pub enum BillingError {
    /// Provider reference is not known to the order ledger.
    OrderNotFound,
    GiftNotFound,
    /// Requested extension tier is not strictly above the current one.
    InvalidTier {
        current: TierKey,
        requested: TierKey,
    },
    /// A previous extension is still waiting for its payment.
    ExtensionPending,
    Db(sqlx::Error),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingError::OrderNotFound => write!(f, "order not found"),
            BillingError::GiftNotFound => write!(f, "gift not found"),
            BillingError::InvalidTier { current, requested } => {
                write!(f, "invalid tier: {requested} is not above current {current}")
            }
            BillingError::ExtensionPending => {
                write!(f, "an unpaid extension is already recorded for this gift")
            }
            BillingError::Db(e) => write!(f, "db error: {e}"),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(value: sqlx::Error) -> Self {
        Self::Db(value)
    }
}
