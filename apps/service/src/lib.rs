//! linkwatch - continuous reachability and throughput sampling
//!
//! Two independently scheduled probers write samples into a durable
//! libsql store; a small actix-web API serves the most recent rows.

pub mod api;
pub mod config;
pub mod error;
pub mod pool;
pub mod probe;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod supervisor;

pub use config::Config;
pub use error::AppError;
pub use supervisor::Supervisor;
