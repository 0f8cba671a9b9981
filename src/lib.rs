pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;

pub use config::AppConfig;
pub use error::{AccrualError, Result, ScripError};
