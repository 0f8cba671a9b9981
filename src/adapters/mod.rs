pub mod accrual;
pub mod postgres;

pub use accrual::{AccrualClient, AccrualReply, AccrualStatus};
pub use postgres::PostgresStore;
