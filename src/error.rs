use thiserror::Error;

/// Main error type for the ledger service
#[derive(Error, Debug)]
pub enum ScripError {
    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Client-facing validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid order identifier: {0}")]
    InvalidOrderId(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Conflicts
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Order already created by another user")]
    OrderOwnedByOther,

    // Ledger errors
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Not found: {0}")]
    NotFound(String),

    // Request deadline exceeded
    #[error("Timeout exceeded")]
    Timeout,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ScripError
pub type Result<T> = std::result::Result<T, ScripError>;

impl ScripError {
    /// HTTP status the error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ScripError::Validation(_) => 400,
            ScripError::Auth(_) => 401,
            ScripError::InsufficientFunds => 402,
            ScripError::NotFound(_) => 404,
            ScripError::Conflict(_) | ScripError::OrderOwnedByOther => 409,
            ScripError::InvalidOrderId(_) => 422,
            _ => 500,
        }
    }

    /// Message safe to return to the API caller. Internal detail stays in logs.
    pub fn client_message(&self) -> String {
        match self {
            ScripError::Validation(_)
            | ScripError::Auth(_)
            | ScripError::InsufficientFunds
            | ScripError::NotFound(_)
            | ScripError::Conflict(_)
            | ScripError::OrderOwnedByOther
            | ScripError::InvalidOrderId(_)
            | ScripError::Timeout => self.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

/// Errors from a single accrual oracle request. The processor absorbs these
/// via the retry buffer; they never reach an API caller.
#[derive(Error, Debug, Clone)]
pub enum AccrualError {
    #[error("order {order} not registered by the accrual system yet")]
    NotRegistered { order: String },

    #[error("accrual transport failure: {0}")]
    Transport(String),

    #[error("accrual response decode failure: {0}")]
    Decode(String),
}

impl From<AccrualError> for ScripError {
    fn from(err: AccrualError) -> Self {
        ScripError::Internal(err.to_string())
    }
}
