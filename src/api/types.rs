use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::domain::{Order, UserBalance, Withdrawal};
use crate::error::ScripError;

/// Error body every failure renders to: `{"code":<int>,"message":"<str>"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for ScripError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code >= 500 {
            error!(error = %self, code, "request failed");
        } else {
            // Client mistakes are expected traffic; keep them out of the
            // operational log levels.
            debug!(error = %self, code, "request rejected");
        }

        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code,
            message: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Decode a request body, mapping malformed JSON to a 400.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ScripError> {
    serde_json::from_str(body)
        .map_err(|_| ScripError::Validation("Unable to parse body".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

// Point amounts cross the wire as plain JSON numbers, so the decimal domain
// scalars are narrowed to f64 at this boundary only.

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderView {
    pub number: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            number: order.id,
            status: order.status.as_str().to_string(),
            accrual: order.accrual.and_then(|a| a.to_f64()),
            uploaded_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceView {
    pub current: f64,
    pub withdrawn: f64,
}

impl From<UserBalance> for BalanceView {
    fn from(balance: UserBalance) -> Self {
        Self {
            current: balance.current.to_f64().unwrap_or_default(),
            withdrawn: balance.withdrawn.to_f64().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    #[serde(default)]
    pub order: String,
    pub sum: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalView {
    pub order: String,
    pub sum: f64,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalView {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order_id,
            sum: withdrawal.amount.to_f64().unwrap_or_default(),
            processed_at: withdrawal.created_at,
        }
    }
}
