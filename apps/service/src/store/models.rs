use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};

/// One reachability check outcome for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilitySample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub success: bool,
}

/// One completed throughput measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "download")]
    pub download_mbps: f64,
    #[serde(rename = "upload")]
    pub upload_mbps: f64,
    #[serde(rename = "ping")]
    pub latency_ms: f64,
}

/// Raw triple reported by a throughput backend
///
/// Any field may be missing. Only complete readings become a [`ThroughputSample`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReading {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// A reading that passed [`ThroughputReading::complete`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompleteReading {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
}

impl ThroughputReading {
    pub fn new(download_mbps: f64, upload_mbps: f64, latency_ms: f64) -> Self {
        Self {
            download_mbps: Some(download_mbps),
            upload_mbps: Some(upload_mbps),
            latency_ms: Some(latency_ms),
        }
    }

    /// Check that all three values are present, finite and non-negative
    pub fn complete(&self) -> StoreResult<CompleteReading> {
        Ok(CompleteReading {
            download_mbps: require("download", self.download_mbps)?,
            upload_mbps: require("upload", self.upload_mbps)?,
            latency_ms: require("latency", self.latency_ms)?,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete().is_ok()
    }
}

fn require(field: &str, value: Option<f64>) -> StoreResult<f64> {
    match value {
        None => Err(StoreError::IncompleteMeasurement(format!("{field} is missing"))),
        Some(v) if !v.is_finite() => {
            Err(StoreError::IncompleteMeasurement(format!("{field} is not finite ({v})")))
        }
        Some(v) if v < 0.0 => {
            Err(StoreError::IncompleteMeasurement(format!("{field} is negative ({v})")))
        }
        Some(v) => Ok(v),
    }
}

/// Convert a UTC instant to the stored representation (unix millis)
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert a stored unix-millis value back to a UTC instant
pub fn i64_to_timestamp(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp(millis))
}
