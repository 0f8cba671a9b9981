use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, ScripError};
use crate::services::{OrderService, TokenService, UserService, WalletService, WithdrawalService};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub orders: Arc<OrderService>,
    pub wallet: Arc<WalletService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub tokens: Arc<TokenService>,
    /// Deadline applied to every HTTP-originated operation
    pub request_timeout: Duration,
}

impl AppState {
    /// Run an operation under the per-request deadline. A fired deadline
    /// drops the operation future (open transactions roll back) and maps to
    /// the Timeout error.
    pub async fn with_deadline<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, op)
            .await
            .map_err(|_| ScripError::Timeout)?
    }
}
