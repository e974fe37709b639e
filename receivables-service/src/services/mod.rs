//! Business services for receivables-service.

pub mod database;
pub mod metrics;

pub use database::Database;
