use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::scheduler::Prober;
use crate::store::ObservationStore;

/// Extra time granted to a check on top of its own timeout before it is abandoned
const CHECK_GRACE: Duration = Duration::from_secs(1);

/// What a reachability check mechanism reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// The mechanism reported an affirmative completion (e.g. an echo reply)
    pub completed: bool,
    pub diagnostic: String,
}

/// Reachability check trait for the external liveness mechanism
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    /// Probe `target` once, giving up after roughly `timeout`
    async fn check(&self, target: &str, timeout: Duration) -> Result<CheckOutcome>;
}

/// ICMP echo through the system `ping` binary
///
/// Raw sockets need elevated privileges, the setuid `ping` does not.
pub struct PingCommand {
    program: String,
}

impl Default for PingCommand {
    fn default() -> Self {
        Self::with_program("ping")
    }
}

impl PingCommand {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl ReachabilityCheck for PingCommand {
    async fn check(&self, target: &str, timeout: Duration) -> Result<CheckOutcome> {
        let wait_seconds = timeout.as_secs().max(1).to_string();

        let output = Command::new(&self.program)
            .args(["-c", "1", "-W", wait_seconds.as_str(), target])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("failed to run {}: {}", self.program, e))?;

        let mut diagnostic = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(stderr.trim());
        }

        Ok(CheckOutcome { completed: output.status.success(), diagnostic })
    }
}

/// Result for one target within a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: String,
    pub success: bool,
    /// Id of the stored sample; `None` when the write failed
    pub sample_id: Option<i64>,
}

/// Reachability prober - one check and one sample per target per cycle
pub struct ReachabilityProber {
    store: Arc<dyn ObservationStore>,
    checker: Arc<dyn ReachabilityCheck>,
    targets: Vec<String>,
    check_timeout: Duration,
    interval: Duration,
}

impl ReachabilityProber {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        checker: Arc<dyn ReachabilityCheck>,
        targets: Vec<String>,
        check_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self { store, checker, targets, check_timeout, interval }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Check a single target; every error degrades to "unreachable"
    async fn probe_target(&self, target: &str) -> bool {
        let check = self.checker.check(target, self.check_timeout);

        match timeout(self.check_timeout + CHECK_GRACE, check).await {
            Ok(Ok(outcome)) if outcome.completed => true,
            Ok(Ok(outcome)) => {
                debug!("{} unreachable: {}", target, outcome.diagnostic);
                false
            }
            Ok(Err(e)) => {
                warn!("Reachability check for {} failed: {:#}", target, e);
                false
            }
            Err(_) => {
                warn!("Reachability check for {} timed out after {:?}", target, self.check_timeout);
                false
            }
        }
    }

    /// Run one full cycle over every target, in order
    pub async fn run_cycle(&self) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::with_capacity(self.targets.len());

        for target in &self.targets {
            let success = self.probe_target(target).await;

            let sample_id = match self.store.append_reachability(target, success, Utc::now()).await {
                Ok(id) => {
                    debug!("Recorded reachability sample {} for {} (success={})", id, target, success);
                    Some(id)
                }
                Err(e) => {
                    warn!("Failed to record reachability sample for {}: {}", target, e);
                    None
                }
            };

            outcomes.push(TargetOutcome { target: target.clone(), success, sample_id });
        }

        outcomes
    }
}

#[async_trait]
impl Prober for ReachabilityProber {
    type Report = Vec<TargetOutcome>;

    fn name(&self) -> &'static str {
        "reachability"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Self::Report {
        ReachabilityProber::run_cycle(self).await
    }
}
