use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use tokio::sync::Mutex;

use super::error::StoreResult;
use super::migrations;
use super::models::{
    ReachabilitySample, ThroughputReading, ThroughputSample, i64_to_timestamp, timestamp_to_i64,
};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Store trait for abstracting sample persistence
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Ensure the sample relations exist; never destroys data
    async fn initialize(&self) -> StoreResult<()>;

    /// Append one reachability sample, returning its id
    async fn append_reachability(
        &self,
        target: &str,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Append one throughput sample, returning its id
    ///
    /// Incomplete readings are rejected without writing anything.
    async fn append_throughput(
        &self,
        reading: &ThroughputReading,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Up to `limit` most recent reachability samples, newest first
    async fn recent_reachability(&self, limit: usize) -> StoreResult<Vec<ReachabilitySample>>;

    /// Up to `limit` most recent reachability samples for one target, newest first
    async fn recent_reachability_for(
        &self,
        target: &str,
        limit: usize,
    ) -> StoreResult<Vec<ReachabilitySample>>;

    /// Up to `limit` most recent throughput samples, newest first
    async fn recent_throughput(&self, limit: usize) -> StoreResult<Vec<ThroughputSample>>;

    async fn count_reachability(&self) -> StoreResult<u64>;

    async fn count_throughput(&self) -> StoreResult<u64>;
}

/// LibSQL store implementation
///
/// Every call checks a connection out of the pool and returns it before
/// resolving. Appends additionally take `write_lock` for the single INSERT so
/// the two probers never race on the SQLite write lock.
pub struct LibsqlStore {
    pool: LibsqlPool,
    write_lock: Mutex<()>,
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl LibsqlStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool, write_lock: Mutex::new(()) }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> StoreResult<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_reachability(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> StoreResult<Vec<ReachabilitySample>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn.prepare(sql).await?;
        let mut rows = stmt.query(args).await?;
        let mut samples = Vec::new();

        while let Some(row) = rows.next().await? {
            samples.push(ReachabilitySample {
                id: row.get(0)?,
                timestamp: i64_to_timestamp(row.get(1)?)?,
                target: row.get(2)?,
                success: row.get::<i64>(3)? != 0,
            });
        }

        Ok(samples)
    }

    async fn count(&self, sql: &str) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ObservationStore for LibsqlStore {
    async fn initialize(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        let _guard = self.write_lock.lock().await;
        migrations::run_migrations(&conn).await
    }

    async fn append_reachability(
        &self,
        target: &str,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO pings (timestamp, target, success) VALUES (?, ?, ?)",
            params![timestamp_to_i64(timestamp), target.to_owned(), i64::from(success)],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn append_throughput(
        &self,
        reading: &ThroughputReading,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let reading = reading.complete()?;

        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO speed_tests (timestamp, download, upload, ping) VALUES (?, ?, ?, ?)",
            params![
                timestamp_to_i64(timestamp),
                reading.download_mbps,
                reading.upload_mbps,
                reading.latency_ms
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn recent_reachability(&self, limit: usize) -> StoreResult<Vec<ReachabilitySample>> {
        self.query_reachability(
            "SELECT id, timestamp, target, success FROM pings ORDER BY id DESC LIMIT ?",
            params![sql_limit(limit)],
        )
        .await
    }

    async fn recent_reachability_for(
        &self,
        target: &str,
        limit: usize,
    ) -> StoreResult<Vec<ReachabilitySample>> {
        self.query_reachability(
            "SELECT id, timestamp, target, success FROM pings WHERE target = ? ORDER BY id DESC LIMIT ?",
            params![target.to_owned(), sql_limit(limit)],
        )
        .await
    }

    async fn recent_throughput(&self, limit: usize) -> StoreResult<Vec<ThroughputSample>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT id, timestamp, download, upload, ping FROM speed_tests ORDER BY id DESC LIMIT ?")
            .await?;

        let mut rows = stmt.query(params![sql_limit(limit)]).await?;
        let mut samples = Vec::new();

        while let Some(row) = rows.next().await? {
            samples.push(ThroughputSample {
                id: row.get(0)?,
                timestamp: i64_to_timestamp(row.get(1)?)?,
                download_mbps: row.get(2)?,
                upload_mbps: row.get(3)?,
                latency_ms: row.get(4)?,
            });
        }

        Ok(samples)
    }

    async fn count_reachability(&self) -> StoreResult<u64> {
        self.count("SELECT COUNT(*) FROM pings").await
    }

    async fn count_throughput(&self) -> StoreResult<u64> {
        self.count("SELECT COUNT(*) FROM speed_tests").await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::pool::open_pool;
    use crate::store::StoreError;

    async fn create_test_store() -> (LibsqlStore, TempDir) {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path().join("test.db")).await.unwrap();
        let store = LibsqlStore::new(pool);
        store.initialize().await.unwrap();
        (store, dir)
    }

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[tokio::test]
    async fn test_recent_returns_min_of_limit_and_total_newest_first() {
        let (store, _dir) = create_test_store().await;

        for i in 0..7 {
            let id = store.append_reachability(&format!("host-{i}"), i % 2 == 0, at(i)).await.unwrap();
            assert_eq!(id, i + 1);
        }

        let recent = store.recent_reachability(5).await.unwrap();
        assert_eq!(recent.len(), 5);
        let ids: Vec<i64> = recent.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![7, 6, 5, 4, 3]);
        assert_eq!(recent[0].target, "host-6");
        assert!(recent[0].success);
        assert!(!recent[1].success);
        assert_eq!(recent[0].timestamp, at(6));

        let all = store.recent_reachability(100).await.unwrap();
        assert_eq!(all.len(), 7);
        let ids: Vec<i64> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=7).rev().collect::<Vec<_>>());

        assert!(store.recent_reachability(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let (store, _dir) = create_test_store().await;

        for target in ["a", "b", "c"] {
            store.append_reachability(target, true, at(0)).await.unwrap();
        }

        let targets: Vec<String> =
            store.recent_reachability(10).await.unwrap().into_iter().map(|s| s.target).collect();
        assert_eq!(targets, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_throughput_round_trip() {
        let (store, _dir) = create_test_store().await;

        store.append_throughput(&ThroughputReading::new(100.5, 20.25, 35.0), at(0)).await.unwrap();
        store.append_throughput(&ThroughputReading::new(80.0, 18.0, 40.5), at(300)).await.unwrap();

        let recent = store.recent_throughput(100).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, 2);
        assert_eq!(recent[0].download_mbps, 80.0);
        assert_eq!(recent[0].latency_ms, 40.5);
        assert_eq!(recent[1].upload_mbps, 20.25);
        assert_eq!(recent[1].timestamp, at(0));
    }

    #[tokio::test]
    async fn test_incomplete_throughput_writes_nothing() {
        let (store, _dir) = create_test_store().await;
        store.append_throughput(&ThroughputReading::new(1.0, 1.0, 1.0), at(0)).await.unwrap();
        let before = store.count_throughput().await.unwrap();

        let partial = ThroughputReading { latency_ms: None, ..ThroughputReading::new(1.0, 2.0, 3.0) };
        let err = store.append_throughput(&partial, at(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::IncompleteMeasurement(_)));

        let err = store.append_throughput(&ThroughputReading::default(), at(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::IncompleteMeasurement(_)));

        assert_eq!(store.count_throughput().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_initialize_twice_keeps_rows() {
        let (store, _dir) = create_test_store().await;
        store.append_reachability("8.8.8.8", true, at(0)).await.unwrap();
        store.append_throughput(&ThroughputReading::new(1.0, 1.0, 1.0), at(0)).await.unwrap();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.count_reachability().await.unwrap(), 1);
        assert_eq!(store.count_throughput().await.unwrap(), 1);

        let conn = store.get_conn().await.unwrap();
        assert_eq!(migrations::get_current_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows_and_continues_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("samples.db");

        {
            let store = LibsqlStore::new(open_pool(&path).await.unwrap());
            store.initialize().await.unwrap();
            store.append_reachability("1.1.1.1", true, at(0)).await.unwrap();
            store.append_reachability("1.1.1.1", false, at(10)).await.unwrap();
        }

        let store = LibsqlStore::new(open_pool(&path).await.unwrap());
        store.initialize().await.unwrap();
        assert_eq!(store.count_reachability().await.unwrap(), 2);

        let id = store.append_reachability("1.1.1.1", true, at(20)).await.unwrap();
        assert_eq!(id, 3);

        let ids: Vec<i64> =
            store.recent_reachability(10).await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_recent_for_target_filters() {
        let (store, _dir) = create_test_store().await;
        for (i, target) in ["a", "b", "a", "b", "a"].iter().enumerate() {
            store.append_reachability(target, true, at(i as i64)).await.unwrap();
        }

        let only_a = store.recent_reachability_for("a", 2).await.unwrap();
        let ids: Vec<i64> = only_a.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 3]);
        assert!(store.recent_reachability_for("c", 10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let (store, _dir) = create_test_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    if worker % 2 == 0 {
                        store.append_reachability(&format!("w{worker}"), true, at(i)).await.unwrap();
                    } else {
                        store
                            .append_throughput(&ThroughputReading::new(1.0, 2.0, 3.0), at(i))
                            .await
                            .unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count_reachability().await.unwrap(), 50);
        assert_eq!(store.count_throughput().await.unwrap(), 50);

        let mut ids: Vec<i64> =
            store.recent_reachability(100).await.unwrap().iter().map(|s| s.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }
}
