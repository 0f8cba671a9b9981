use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::PostgresStore;
use crate::domain::{validate_order_id, Order};
use crate::error::{Result, ScripError};

/// Outcome of admitting an order identifier.
#[derive(Debug, Clone)]
pub enum OrderAdmission {
    /// Fresh identifier: persisted and queued for processing (202).
    New(Order),
    /// Same user re-submitted an identifier they already own. Idempotent
    /// accept, no state change (200).
    Duplicate,
}

/// Order intake: validates, persists and enqueues submissions.
pub struct OrderService {
    store: Arc<PostgresStore>,
    queue: mpsc::Sender<Order>,
}

impl OrderService {
    pub fn new(store: Arc<PostgresStore>, queue: mpsc::Sender<Order>) -> Self {
        Self { store, queue }
    }

    /// Admit an order identifier for the given user. Three-way outcome: new,
    /// same-owner repeat, or a conflict when another user owns the identifier.
    pub async fn submit_order(&self, order_id: &str, user_uuid: Uuid) -> Result<OrderAdmission> {
        validate_order_id(order_id)?;

        if let Some(existing) = self.store.find_order(order_id).await? {
            return Self::admission_of_existing(&existing, user_uuid);
        }

        let order = Order::new(order_id.to_string(), user_uuid);
        match self.store.insert_order(&order).await {
            Ok(()) => {}
            Err(ScripError::Conflict(_)) => {
                // Lost a race with a concurrent submission of the same
                // identifier; resolve against the winner's row.
                let existing = self.store.find_order(order_id).await?.ok_or_else(|| {
                    ScripError::Internal(format!("order {order_id} vanished after insert conflict"))
                })?;
                return Self::admission_of_existing(&existing, user_uuid);
            }
            Err(err) => return Err(err),
        }

        // Persist first, enqueue second: the two are not atomic. If the send
        // fails the order stays NEW and startup recovery re-queues it.
        if self.queue.send(order.clone()).await.is_err() {
            warn!(order_id = %order.id, "work queue closed, order left for startup recovery");
        }

        Ok(OrderAdmission::New(order))
    }

    fn admission_of_existing(existing: &Order, user_uuid: Uuid) -> Result<OrderAdmission> {
        if existing.user_uuid != user_uuid {
            Err(ScripError::OrderOwnedByOther)
        } else {
            Ok(OrderAdmission::Duplicate)
        }
    }

    /// All orders of the user, newest first.
    pub async fn orders_for_user(&self, user_uuid: Uuid) -> Result<Vec<Order>> {
        self.store.orders_for_user(user_uuid).await
    }
}
