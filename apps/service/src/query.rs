use std::sync::Arc;

use thiserror::Error;

use crate::store::{ObservationStore, ReachabilitySample, StoreError, ThroughputSample};

/// Number of samples returned per read
pub const RECENT_LIMIT: usize = 100;

#[derive(Debug, Error)]
#[error("failed to read {kind} samples: {source}")]
pub struct QueryError {
    pub kind: &'static str,
    #[source]
    pub source: StoreError,
}

/// Read-only façade over the observation store
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn ObservationStore>,
    limit: usize,
}

impl QueryService {
    pub fn new(store: Arc<dyn ObservationStore>) -> Self {
        Self { store, limit: RECENT_LIMIT }
    }

    pub async fn recent_reachability(&self) -> Result<Vec<ReachabilitySample>, QueryError> {
        self.store
            .recent_reachability(self.limit)
            .await
            .map_err(|source| QueryError { kind: "reachability", source })
    }

    pub async fn recent_reachability_for(
        &self,
        target: &str,
    ) -> Result<Vec<ReachabilitySample>, QueryError> {
        self.store
            .recent_reachability_for(target, self.limit)
            .await
            .map_err(|source| QueryError { kind: "reachability", source })
    }

    pub async fn recent_throughput(&self) -> Result<Vec<ThroughputSample>, QueryError> {
        self.store
            .recent_throughput(self.limit)
            .await
            .map_err(|source| QueryError { kind: "throughput", source })
    }

    /// Stored sample counts as (reachability, throughput)
    pub async fn counts(&self) -> Result<(u64, u64), QueryError> {
        let reachability = self
            .store
            .count_reachability()
            .await
            .map_err(|source| QueryError { kind: "reachability", source })?;
        let throughput = self
            .store
            .count_throughput()
            .await
            .map_err(|source| QueryError { kind: "throughput", source })?;
        Ok((reachability, throughput))
    }
}
