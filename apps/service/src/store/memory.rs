use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StoreError, StoreResult};
use super::models::{ReachabilitySample, ThroughputReading, ThroughputSample};
use super::repository::ObservationStore;

/// Non-persistent store for tests and dry runs
///
/// Follows the same append/ordering contract as [`LibsqlStore`](super::LibsqlStore).
/// Reads and writes can be forced to fail to exercise degraded paths.
#[derive(Default)]
pub struct MemoryStore {
    samples: Mutex<Samples>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

#[derive(Default)]
struct Samples {
    reachability: Vec<ReachabilitySample>,
    throughput: Vec<ThroughputSample>,
}

fn injected() -> StoreError {
    StoreError::Unavailable("injected failure".into())
}

fn newest_first<T: Clone>(rows: &[T], limit: usize) -> Vec<T> {
    rows.iter().rev().take(limit).cloned().collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) { Err(injected()) } else { Ok(()) }
    }

    fn check_writes(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) { Err(injected()) } else { Ok(()) }
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn append_reachability(
        &self,
        target: &str,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64> {
        self.check_writes()?;
        let mut samples = self.lock();
        let id = samples.reachability.len() as i64 + 1;
        samples.reachability.push(ReachabilitySample {
            id,
            timestamp,
            target: target.to_owned(),
            success,
        });
        Ok(id)
    }

    async fn append_throughput(
        &self,
        reading: &ThroughputReading,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let reading = reading.complete()?;
        self.check_writes()?;
        let mut samples = self.lock();
        let id = samples.throughput.len() as i64 + 1;
        samples.throughput.push(ThroughputSample {
            id,
            timestamp,
            download_mbps: reading.download_mbps,
            upload_mbps: reading.upload_mbps,
            latency_ms: reading.latency_ms,
        });
        Ok(id)
    }

    async fn recent_reachability(&self, limit: usize) -> StoreResult<Vec<ReachabilitySample>> {
        self.check_reads()?;
        Ok(newest_first(&self.lock().reachability, limit))
    }

    async fn recent_reachability_for(
        &self,
        target: &str,
        limit: usize,
    ) -> StoreResult<Vec<ReachabilitySample>> {
        self.check_reads()?;
        Ok(self
            .lock()
            .reachability
            .iter()
            .rev()
            .filter(|sample| sample.target == target)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_throughput(&self, limit: usize) -> StoreResult<Vec<ThroughputSample>> {
        self.check_reads()?;
        Ok(newest_first(&self.lock().throughput, limit))
    }

    async fn count_reachability(&self) -> StoreResult<u64> {
        self.check_reads()?;
        Ok(self.lock().reachability.len() as u64)
    }

    async fn count_throughput(&self) -> StoreResult<u64> {
        self.check_reads()?;
        Ok(self.lock().throughput.len() as u64)
    }
}
