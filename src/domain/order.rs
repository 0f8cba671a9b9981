use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScripError};

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Order admitted, not yet seen by the accrual system
    New,
    /// Accrual system is evaluating the order
    Processing,
    /// Accrual system rejected the order
    Invalid,
    /// Accrual system settled the order; accrual amount is present
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// INVALID and PROCESSED never leave their state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = ScripError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(ScripError::Internal(format!(
                "unknown order status in storage: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's submission of an external purchase identifier for loyalty
/// evaluation. The identifier is globally unique across all users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_uuid: Uuid,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: String, user_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_uuid,
            status: OrderStatus::New,
            accrual: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Validate an order identifier: non-empty, digits only, passing the mod-10
/// checksum. Returns the 422-mapped error on failure.
pub fn validate_order_id(id: &str) -> Result<()> {
    if luhn_valid(id) {
        Ok(())
    } else {
        Err(ScripError::InvalidOrderId(id.to_string()))
    }
}

fn luhn_valid(id: &str) -> bool {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = id
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}
