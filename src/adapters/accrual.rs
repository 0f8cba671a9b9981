//! Accrual oracle client.
//!
//! One rate-limited GET per call, no internal retries: the status-dependent
//! retry policy belongs to the order processor, the client's only job is
//! compliance with the oracle's rate contract.

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::OrderStatus;
use crate::error::{AccrualError, Result, ScripError};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Status vocabulary of the accrual system's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
    #[serde(other)]
    Unknown,
}

impl AccrualStatus {
    /// Map the external status into the internal order status. Anything the
    /// oracle invents that we do not know is treated as INVALID.
    pub fn into_order_status(self) -> OrderStatus {
        match self {
            AccrualStatus::Registered => OrderStatus::New,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
            AccrualStatus::Unknown => OrderStatus::Invalid,
        }
    }
}

/// Decoded 200 response from `GET /api/orders/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

#[derive(Clone)]
pub struct AccrualClient {
    http: Client,
    base_url: String,
    limiter: Arc<DirectRateLimiter>,
}

impl AccrualClient {
    /// Build a client against `base_url` holding the steady rate of
    /// `rate_per_minute` requests with a per-request `timeout`.
    pub fn new(base_url: &str, rate_per_minute: u32, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScripError::Internal(format!("failed to build accrual client: {e}")))?;

        let rate = NonZeroU32::new(rate_per_minute)
            .unwrap_or_else(|| NonZeroU32::new(60).expect("60 is non-zero"));
        // Burst of 1 keeps the bucket leaky: one request per tick, no
        // front-loaded batch after an idle period.
        let quota = Quota::per_minute(rate).allow_burst(NonZeroU32::new(1).expect("1 is non-zero"));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the oracle's view of one order. Blocks until a rate-limit slot
    /// is available, then performs exactly one request.
    pub async fn order_info(
        &self,
        order_id: &str,
    ) -> std::result::Result<AccrualReply, AccrualError> {
        self.limiter.until_ready().await;

        let url = format!("{}/api/orders/{}", self.base_url, order_id);
        debug!(order_id, "accrual request");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        match status {
            200 => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| AccrualError::Transport(e.to_string()))?;
                info!(order_id, status, body = %body, "accrual response");
                serde_json::from_str(&body).map_err(|e| AccrualError::Decode(e.to_string()))
            }
            204 => {
                debug!(order_id, "order not registered by accrual system");
                Err(AccrualError::NotRegistered {
                    order: order_id.to_string(),
                })
            }
            _ => {
                warn!(order_id, status, "unexpected accrual status");
                Err(AccrualError::Transport(format!(
                    "unexpected status {status} for order {order_id}"
                )))
            }
        }
    }
}
