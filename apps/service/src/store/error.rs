use thiserror::Error;

/// Errors reported by an [`ObservationStore`](super::ObservationStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    /// A throughput reading was missing a value or carried a non-finite or negative one.
    #[error("incomplete throughput measurement: {0}")]
    IncompleteMeasurement(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;
