//! Observation store
//!
//! Durable append-only persistence for reachability and throughput samples.
//! The probers write through [`ObservationStore`]; the query service reads
//! through the same handle. Rows are never updated or deleted here.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{ReachabilitySample, ThroughputReading, ThroughputSample};
pub use repository::{LibsqlStore, ObservationStore};
