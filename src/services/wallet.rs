use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::PostgresStore;
use crate::domain::{UserBalance, Wallet};
use crate::error::Result;

/// Wallet ledger operations. Every mutation takes the caller's transaction so
/// it can compose with other writes in the same atomic unit; the atomicity
/// boundary stays visible in the signature.
pub struct WalletService {
    store: Arc<PostgresStore>,
}

impl WalletService {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }

    pub async fn create_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
    ) -> Result<()> {
        self.store.create_wallet(tx, user_uuid).await
    }

    pub async fn credit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
        amount: Decimal,
    ) -> Result<Wallet> {
        self.store.credit_wallet(tx, user_uuid, amount).await
    }

    pub async fn debit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
        amount: Decimal,
    ) -> Result<Wallet> {
        self.store.debit_wallet(tx, user_uuid, amount).await
    }

    /// Read-only balance snapshot.
    pub async fn balance(&self, user_uuid: Uuid) -> Result<UserBalance> {
        let wallet = self.store.wallet_for_user(user_uuid).await?;
        Ok(UserBalance {
            current: wallet.balance(),
            withdrawn: wallet.debits,
        })
    }
}
