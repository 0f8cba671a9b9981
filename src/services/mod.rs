pub mod orders;
pub mod processor;
pub mod retry;
pub mod tokens;
pub mod users;
pub mod wallet;
pub mod withdrawals;

pub use orders::{OrderAdmission, OrderService};
pub use processor::OrderProcessor;
pub use retry::RetryBuffer;
pub use tokens::TokenService;
pub use users::UserService;
pub use wallet::WalletService;
pub use withdrawals::WithdrawalService;
