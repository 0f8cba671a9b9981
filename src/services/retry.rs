//! Retry buffer for orders awaiting another accrual poll.
//!
//! In-memory and intentionally coarse: a stuck order is re-polled at most
//! once per TTL plus the oracle's rate-limit interval, which bounds oracle
//! load even under failure storms. Contents are lost on restart; startup
//! recovery re-seeds from persistent state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::Order;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

struct PendingRetry {
    order: Order,
    due_at: Instant,
}

/// Keyed holding area that re-emits each buffered order onto the work queue
/// once its TTL expires.
#[derive(Clone)]
pub struct RetryBuffer {
    entries: Arc<Mutex<HashMap<String, PendingRetry>>>,
    ttl: Duration,
}

impl RetryBuffer {
    /// Create the buffer and spawn its sweeper. Due entries are checked on a
    /// fine tick so re-emission tracks the TTL; the coarser cleanup tick only
    /// compacts the map and reports depth.
    pub fn start(
        ttl: Duration,
        cleanup_interval: Duration,
        queue: mpsc::Sender<Order>,
    ) -> Self {
        let buffer = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        };

        let entries = buffer.entries.clone();
        let sweep_every = ttl.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_every);
            let mut cleanup = tokio::time::interval(cleanup_interval.max(sweep_every));
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let due = {
                            let mut entries = entries.lock().await;
                            let now = Instant::now();
                            let keys: Vec<String> = entries
                                .iter()
                                .filter(|(_, pending)| pending.due_at <= now)
                                .map(|(key, _)| key.clone())
                                .collect();
                            keys.into_iter()
                                .filter_map(|key| entries.remove(&key))
                                .collect::<Vec<_>>()
                        };
                        for pending in due {
                            debug!(order_id = %pending.order.id, "retry TTL expired, re-queueing order");
                            if queue.send(pending.order).await.is_err() {
                                // Queue closed: shutting down. Anything still
                                // buffered is recoverable from storage.
                                warn!("work queue closed, retry sweeper stopping");
                                return;
                            }
                        }
                    }
                    _ = cleanup.tick() => {
                        let mut entries = entries.lock().await;
                        entries.shrink_to_fit();
                        if !entries.is_empty() {
                            debug!(depth = entries.len(), "retry buffer cleanup");
                        }
                    }
                }
            }
        });

        buffer
    }

    /// Buffer an order for re-polling. No-op when the identifier is already
    /// buffered, so multiple signals on the same stuck order cannot amplify
    /// into duplicate retries.
    pub async fn add(&self, order: &Order) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&order.id) {
            debug!(order_id = %order.id, "order already buffered for retry");
            return;
        }
        entries.insert(
            order.id.clone(),
            PendingRetry {
                order: order.clone(),
                due_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn order(id: &str) -> Order {
        Order::new(id.to_string(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_add_is_idempotent_per_episode() {
        let (tx, _rx) = mpsc::channel(10);
        let buffer = RetryBuffer::start(Duration::from_secs(60), Duration::from_secs(300), tx);

        buffer.add(&order("79927398713")).await;
        buffer.add(&order("79927398713")).await;
        assert_eq!(buffer.len().await, 1);

        buffer.add(&order("12345678903")).await;
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_order_is_emitted_once() {
        let (tx, mut rx) = mpsc::channel(10);
        let buffer = RetryBuffer::start(Duration::from_millis(50), Duration::from_secs(300), tx);

        buffer.add(&order("79927398713")).await;

        let emitted = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("order should be re-emitted after TTL")
            .expect("queue open");
        assert_eq!(emitted.id, "79927398713");
        assert_eq!(buffer.len().await, 0);

        // Nothing else is buffered, so nothing else may arrive.
        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "only one emission per buffering episode");
    }

    #[tokio::test]
    async fn test_new_episode_after_emission() {
        let (tx, mut rx) = mpsc::channel(10);
        let buffer = RetryBuffer::start(Duration::from_millis(50), Duration::from_secs(300), tx);

        buffer.add(&order("79927398713")).await;
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        buffer.add(&first).await;
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("re-added order is emitted again")
            .unwrap();
        assert_eq!(second.id, "79927398713");
    }
}
