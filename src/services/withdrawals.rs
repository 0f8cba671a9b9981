use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::PostgresStore;
use crate::domain::{validate_order_id, Withdrawal};
use crate::error::{Result, ScripError};

/// Withdrawal flow: debit the wallet and append the withdrawal row in one
/// transaction, aborting when the balance would go negative.
pub struct WithdrawalService {
    store: Arc<PostgresStore>,
}

impl WithdrawalService {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }

    /// Withdraw `amount` points against a future purchase `order_id`. The
    /// identifier is Luhn-checked but is not required to exist in `orders`.
    pub async fn create_withdrawal(
        &self,
        user_uuid: Uuid,
        order_id: &str,
        amount: Decimal,
    ) -> Result<()> {
        validate_order_id(order_id)?;
        if amount <= Decimal::ZERO {
            return Err(ScripError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        // The debit takes the row lock; concurrent withdrawals for the same
        // wallet serialise on it, so the balance check below is race-free.
        let wallet = self.store.debit_wallet(&mut tx, user_uuid, amount).await?;
        if wallet.balance() < Decimal::ZERO {
            // tx rolls back on drop
            return Err(ScripError::InsufficientFunds);
        }

        let withdrawal = Withdrawal::new(user_uuid, order_id.to_string(), amount);
        self.store.insert_withdrawal(&mut tx, &withdrawal).await?;

        tx.commit().await?;
        Ok(())
    }

    /// All withdrawals of the user, oldest first.
    pub async fn withdrawals_for_user(&self, user_uuid: Uuid) -> Result<Vec<Withdrawal>> {
        self.store.withdrawals_for_user(user_uuid).await
    }
}
