use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::scheduler::Prober;
use crate::store::{ObservationStore, StoreError, ThroughputReading};

const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Why a throughput cycle produced no sample
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The backend could not fetch its own configuration or server list
    ConfigRetrieval(String),
    Backend(String),
    Timeout(Duration),
    Incomplete(String),
    /// The measurement succeeded but the store write failed
    WriteFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConfigRetrieval(detail) => write!(f, "configuration retrieval failed: {detail}"),
            SkipReason::Backend(detail) => write!(f, "backend error: {detail}"),
            SkipReason::Timeout(limit) => write!(f, "timed out after {limit:?}"),
            SkipReason::Incomplete(detail) => write!(f, "incomplete result: {detail}"),
            SkipReason::WriteFailed(detail) => write!(f, "store write failed: {detail}"),
        }
    }
}

/// Outcome of one measurement attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Success(ThroughputReading),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Error)]
#[error("throughput backend unavailable: {0}")]
pub struct BackendUnavailable(pub String);

/// Narrow view of a throughput measurement service
#[async_trait]
pub trait ThroughputBackend: Send + Sync {
    /// Checked once at startup; an error disables throughput probing
    async fn ensure_available(&self) -> Result<(), BackendUnavailable>;

    /// Select a server and measure download, upload and latency once
    async fn measure(&self) -> Measurement;
}

/// Shape of `speedtest-cli --json` output that we rely on
#[derive(Debug, Deserialize)]
struct SpeedtestReport {
    /// bits per second
    download: Option<f64>,
    /// bits per second
    upload: Option<f64>,
    /// milliseconds
    ping: Option<f64>,
}

/// Throughput backend running the `speedtest-cli` command
pub struct SpeedtestCli {
    program: String,
    args: Vec<String>,
}

impl SpeedtestCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: vec!["--json".into(), "--secure".into()] }
    }

    /// Replace the measurement arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Map a failed run's stderr to a skip reason
fn classify_failure(stderr: &str) -> SkipReason {
    let detail = stderr.trim().lines().last().unwrap_or("exited with failure").to_string();
    if stderr.to_ascii_lowercase().contains("configuration") {
        SkipReason::ConfigRetrieval(detail)
    } else {
        SkipReason::Backend(detail)
    }
}

/// Turn `speedtest-cli --json` output into a measurement
fn parse_report(stdout: &[u8]) -> Measurement {
    let report: SpeedtestReport = match serde_json::from_slice(stdout) {
        Ok(report) => report,
        Err(e) => return Measurement::Skipped(SkipReason::Backend(format!("unparseable output: {e}"))),
    };

    let reading = ThroughputReading {
        download_mbps: report.download.map(|bits| bits / BITS_PER_MEGABIT),
        upload_mbps: report.upload.map(|bits| bits / BITS_PER_MEGABIT),
        latency_ms: report.ping,
    };

    match reading.complete() {
        Ok(_) => Measurement::Success(reading),
        Err(e) => Measurement::Skipped(SkipReason::Incomplete(e.to_string())),
    }
}

#[async_trait]
impl ThroughputBackend for SpeedtestCli {
    async fn ensure_available(&self) -> Result<(), BackendUnavailable> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BackendUnavailable(format!("{} is not installed", self.program)),
                _ => BackendUnavailable(format!("failed to run {}: {}", self.program, e)),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BackendUnavailable(format!(
                "{} --version exited with {}",
                self.program, output.status
            )))
        }
    }

    async fn measure(&self) -> Measurement {
        let output = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return Measurement::Skipped(SkipReason::Backend(format!(
                    "failed to run {}: {}",
                    self.program, e
                )));
            }
        };

        if !output.status.success() {
            return Measurement::Skipped(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_report(&output.stdout)
    }
}

/// Result of one throughput cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ThroughputReport {
    Recorded { id: i64 },
    Skipped(SkipReason),
}

/// Throughput prober - at most one sample per cycle
pub struct ThroughputProber {
    store: Arc<dyn ObservationStore>,
    backend: Arc<dyn ThroughputBackend>,
    measure_timeout: Duration,
    interval: Duration,
}

impl ThroughputProber {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        backend: Arc<dyn ThroughputBackend>,
        measure_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self { store, backend, measure_timeout, interval }
    }

    /// Measure once and record the sample, or skip the cycle
    pub async fn run_cycle(&self) -> ThroughputReport {
        let measurement = match timeout(self.measure_timeout, self.backend.measure()).await {
            Ok(measurement) => measurement,
            Err(_) => Measurement::Skipped(SkipReason::Timeout(self.measure_timeout)),
        };

        let report = match measurement {
            Measurement::Success(reading) => {
                match self.store.append_throughput(&reading, Utc::now()).await {
                    Ok(id) => ThroughputReport::Recorded { id },
                    Err(StoreError::IncompleteMeasurement(detail)) => {
                        ThroughputReport::Skipped(SkipReason::Incomplete(detail))
                    }
                    Err(e) => ThroughputReport::Skipped(SkipReason::WriteFailed(e.to_string())),
                }
            }
            Measurement::Skipped(reason) => ThroughputReport::Skipped(reason),
        };

        match &report {
            ThroughputReport::Recorded { id } => info!("Recorded throughput sample {}", id),
            ThroughputReport::Skipped(reason) => warn!("Throughput cycle skipped: {}", reason),
        }

        report
    }
}

#[async_trait]
impl Prober for ThroughputProber {
    type Report = ThroughputReport;

    fn name(&self) -> &'static str {
        "throughput"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn prepare(&self) -> anyhow::Result<()> {
        self.backend.ensure_available().await?;
        Ok(())
    }

    async fn run_cycle(&self) -> Self::Report {
        ThroughputProber::run_cycle(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::store::MemoryStore;

    /// Backend replaying a fixed list of measurements
    struct ScriptedBackend {
        script: Mutex<VecDeque<Measurement>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Measurement>) -> Self {
            Self { script: Mutex::new(script.into()), delay: Duration::ZERO }
        }
    }

    #[async_trait]
    impl ThroughputBackend for ScriptedBackend {
        async fn ensure_available(&self) -> Result<(), BackendUnavailable> {
            Ok(())
        }

        async fn measure(&self) -> Measurement {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Measurement::Skipped(SkipReason::Backend("script exhausted".into())))
        }
    }

    fn prober(store: Arc<MemoryStore>, backend: ScriptedBackend) -> ThroughputProber {
        ThroughputProber::new(store, Arc::new(backend), Duration::from_secs(60), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let backend =
            ScriptedBackend::new(vec![Measurement::Success(ThroughputReading::new(90.0, 15.0, 25.0))]);
        let prober = prober(store.clone(), backend);

        assert_eq!(prober.run_cycle().await, ThroughputReport::Recorded { id: 1 });
        let stored = store.recent_throughput(10).await.unwrap();
        assert_eq!(stored[0].download_mbps, 90.0);
    }

    #[tokio::test]
    async fn test_skips_write_nothing() {
        let store = Arc::new(MemoryStore::new());
        let partial = ThroughputReading { upload_mbps: None, ..ThroughputReading::new(1.0, 1.0, 1.0) };
        let backend = ScriptedBackend::new(vec![
            Measurement::Skipped(SkipReason::ConfigRetrieval("Cannot retrieve speedtest configuration".into())),
            Measurement::Success(partial),
        ]);
        let prober = prober(store.clone(), backend);

        assert!(matches!(
            prober.run_cycle().await,
            ThroughputReport::Skipped(SkipReason::ConfigRetrieval(_))
        ));
        assert!(matches!(prober.run_cycle().await, ThroughputReport::Skipped(SkipReason::Incomplete(_))));
        assert_eq!(store.count_throughput().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_skips_cycle() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let backend =
            ScriptedBackend::new(vec![Measurement::Success(ThroughputReading::new(1.0, 1.0, 1.0))]);
        let prober = prober(store.clone(), backend);

        assert!(matches!(prober.run_cycle().await, ThroughputReport::Skipped(SkipReason::WriteFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_measurement_times_out() {
        let store = Arc::new(MemoryStore::new());
        let mut backend =
            ScriptedBackend::new(vec![Measurement::Success(ThroughputReading::new(1.0, 1.0, 1.0))]);
        backend.delay = Duration::from_secs(600);
        let prober = prober(store.clone(), backend);

        assert_eq!(
            prober.run_cycle().await,
            ThroughputReport::Skipped(SkipReason::Timeout(Duration::from_secs(60)))
        );
        assert_eq!(store.count_throughput().await.unwrap(), 0);
    }

    #[test]
    fn test_parse_report_converts_to_mbps() {
        let json = br#"{"download": 94500000.0, "upload": 12250000.0, "ping": 31.5, "server": {"id": "1"}}"#;
        match parse_report(json) {
            Measurement::Success(reading) => {
                assert_eq!(reading, ThroughputReading::new(94.5, 12.25, 31.5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_report_rejects_partial_and_garbage() {
        assert!(matches!(
            parse_report(br#"{"download": 1000000.0, "ping": 20.0}"#),
            Measurement::Skipped(SkipReason::Incomplete(_))
        ));
        assert!(matches!(parse_report(b"not json"), Measurement::Skipped(SkipReason::Backend(_))));
    }

    #[test]
    fn test_classify_failure() {
        let stderr = "Retrieving speedtest.net configuration...\nCannot retrieve speedtest configuration\nERROR: HTTP Error 403: Forbidden\n";
        assert!(matches!(classify_failure(stderr), SkipReason::ConfigRetrieval(_)));
        assert!(matches!(classify_failure("ERROR: No matched servers"), SkipReason::Backend(_)));
        assert_eq!(classify_failure(""), SkipReason::Backend("exited with failure".into()));
    }

    #[tokio::test]
    async fn test_missing_cli_is_unavailable() {
        let backend = SpeedtestCli::new("/nonexistent/speedtest-cli");
        let err = backend.ensure_available().await.unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_output_and_failure_mapping() {
        let ok = SpeedtestCli::new("sh").with_args([
            "-c",
            r#"echo '{"download": 50000000.0, "upload": 10000000.0, "ping": 12.0}'"#,
        ]);
        assert_eq!(ok.measure().await, Measurement::Success(ThroughputReading::new(50.0, 10.0, 12.0)));

        let config = SpeedtestCli::new("sh")
            .with_args(["-c", "echo 'Cannot retrieve speedtest configuration' >&2; exit 1"]);
        assert!(matches!(config.measure().await, Measurement::Skipped(SkipReason::ConfigRetrieval(_))));
    }
}
