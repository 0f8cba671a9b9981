//! Order processing worker.
//!
//! A single long-lived task consumes the work queue, polls the accrual oracle
//! for each order, and applies the resulting status transition together with
//! the wallet credit in one transaction. Failures never surface to API
//! callers: the only recovery mechanism is re-injection through the retry
//! buffer, plus startup recovery from persistent state after a restart.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::adapters::{AccrualClient, PostgresStore};
use crate::domain::{Order, OrderStatus};
use crate::error::Result;
use crate::services::retry::RetryBuffer;

const RECOVERY_PAGE_SIZE: i64 = 20;

#[derive(Clone)]
pub struct OrderProcessor {
    store: Arc<PostgresStore>,
    oracle: Arc<AccrualClient>,
    retries: RetryBuffer,
    queue: mpsc::Sender<Order>,
}

impl OrderProcessor {
    pub fn new(
        store: Arc<PostgresStore>,
        oracle: Arc<AccrualClient>,
        retries: RetryBuffer,
        queue: mpsc::Sender<Order>,
    ) -> Self {
        Self {
            store,
            oracle,
            retries,
            queue,
        }
    }

    /// Page every order still awaiting a terminal status back onto the work
    /// queue. Anything that was in flight when the previous process died is
    /// re-polled, which gives at-least-once processing across restarts.
    pub async fn recover_unfinished(&self) -> Result<usize> {
        let total = self.store.count_unfinished_orders().await?;
        if total == 0 {
            info!("no unfinished orders to recover");
            return Ok(0);
        }

        let mut published = 0usize;
        let mut offset = 0i64;
        while offset < total {
            let page = self
                .store
                .unfinished_orders_page(RECOVERY_PAGE_SIZE, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            for order in page {
                if self.queue.send(order).await.is_err() {
                    info!(published, "work queue closed during recovery");
                    return Ok(published);
                }
                published += 1;
            }
            offset += RECOVERY_PAGE_SIZE;
        }

        info!(total, published, "re-queued unfinished orders");
        Ok(published)
    }

    /// Consume the work queue until shutdown. Runs startup recovery
    /// concurrently so a backlog larger than the queue capacity drains
    /// through this same loop instead of deadlocking the seeder.
    pub async fn run(self, mut rx: mpsc::Receiver<Order>, mut shutdown: watch::Receiver<bool>) {
        let seeder = self.clone();
        tokio::spawn(async move {
            if let Err(err) = seeder.recover_unfinished().await {
                error!(error = %err, "failed to recover unfinished orders");
            }
        });

        info!("order processor started");
        loop {
            tokio::select! {
                maybe_order = rx.recv() => match maybe_order {
                    Some(order) => self.process(order).await,
                    None => {
                        info!("work queue closed, order processor stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("shutdown requested, order processor stopping");
                    break;
                }
            }
        }
    }

    async fn process(&self, order: Order) {
        debug!(order_id = %order.id, "processing order");

        let reply = match self.oracle.order_info(&order.id).await {
            Ok(reply) => reply,
            Err(err) => {
                // Transport trouble, a 204, or an undecodable body: no
                // persistent state change, poll again after the TTL.
                debug!(order_id = %order.id, error = %err, "accrual poll failed, buffering retry");
                self.retries.add(&order).await;
                return;
            }
        };

        let mut updated = order;
        updated.status = reply.status.into_order_status();
        updated.accrual = match updated.status {
            OrderStatus::Processed => reply.accrual.filter(|a| *a > Decimal::ZERO),
            _ => None,
        };
        updated.updated_at = Utc::now();

        if let Err(err) = self.apply(&updated).await {
            // The transaction rolled back, so no partial state escaped.
            error!(order_id = %updated.id, error = %err, "failed to apply order update");
            self.retries.add(&updated).await;
            return;
        }

        if !updated.status.is_terminal() {
            // The oracle still reports the order unfinished. Without
            // re-buffering it would stall until the next restart.
            self.retries.add(&updated).await;
        }
    }

    /// One transaction: order row update plus, for a settled order, the
    /// wallet credit. The update only touches non-terminal rows, so a
    /// duplicate delivery of a settled order credits nothing.
    async fn apply(&self, order: &Order) -> Result<()> {
        let mut tx = self.store.begin().await?;

        let applied = self.store.update_order(&mut tx, order).await?;
        if applied == 0 {
            debug!(order_id = %order.id, "order already terminal, skipping");
            tx.rollback().await?;
            return Ok(());
        }

        if order.status == OrderStatus::Processed {
            if let Some(accrual) = order.accrual {
                let wallet = self
                    .store
                    .credit_wallet(&mut tx, order.user_uuid, accrual)
                    .await?;
                debug!(
                    order_id = %order.id,
                    %accrual,
                    balance = %wallet.balance(),
                    "wallet credited"
                );
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
