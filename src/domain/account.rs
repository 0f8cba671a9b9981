use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered account. Created once, never mutated by the core; deleting a
/// user cascades to orders, wallet and withdrawals at the storage level.
#[derive(Debug, Clone)]
pub struct User {
    pub uuid: Uuid,
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user two-column ledger. `credits` and `debits` only ever grow; the
/// spendable balance is their difference and stays non-negative at every
/// committed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_uuid: Uuid,
    pub credits: Decimal,
    pub debits: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn balance(&self) -> Decimal {
        self.credits - self.debits
    }
}

/// Balance snapshot as the API reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserBalance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// Append-only debit event against a wallet. `order_id` names a future
/// external purchase, not a row in `orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Option<i64>,
    pub user_uuid: Uuid,
    pub order_id: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(user_uuid: Uuid, order_id: String, amount: Decimal) -> Self {
        Self {
            id: None,
            user_uuid,
            order_id,
            amount,
            created_at: Utc::now(),
        }
    }
}
