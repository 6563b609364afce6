use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A sampling loop that the scheduler can drive
///
/// Implementors perform one full cycle per [`run_cycle`](Prober::run_cycle)
/// call; the scheduler owns the sleeping and the shutdown checks.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    type Report: fmt::Debug + Send;

    fn name(&self) -> &'static str;

    /// Sleep between the end of one cycle and the start of the next
    fn interval(&self) -> Duration;

    /// Called once before the first cycle; an error stops this prober for good
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_cycle(&self) -> Self::Report;
}

/// Lifecycle state of one driven prober
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Running { cycle: u64 },
    Sleeping { cycle: u64 },
    Stopped(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Unavailable(String),
}

/// Read side of a spawned prober's state
#[derive(Debug, Clone)]
pub struct ProbeStatus {
    name: &'static str,
    state: watch::Receiver<ProbeState>,
}

impl ProbeStatus {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ProbeState {
        self.state.borrow().clone()
    }

    /// Number of cycles started so far
    pub fn cycles(&self) -> u64 {
        match *self.state.borrow() {
            ProbeState::Running { cycle } | ProbeState::Sleeping { cycle } => cycle,
            _ => 0,
        }
    }

    /// Wait until the prober reports a stopped state
    pub async fn stopped(&mut self) -> StopReason {
        loop {
            if let ProbeState::Stopped(reason) = &*self.state.borrow_and_update() {
                return reason.clone();
            }
            if self.state.changed().await.is_err() {
                return StopReason::Shutdown;
            }
        }
    }
}

/// Probe scheduler - runs each prober as an independent task
pub struct ProbeScheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for ProbeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx, tasks: Vec::new() }
    }

    /// Start driving `prober` on its own task
    pub fn spawn<P: Prober>(&mut self, prober: P) -> ProbeStatus {
        let name = prober.name();
        let (state_tx, state_rx) = watch::channel(ProbeState::Idle);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(drive(prober, shutdown_rx, state_tx));
        self.tasks.push((name, handle));

        ProbeStatus { name, state: state_rx }
    }

    /// Signal every prober to stop after its current cycle and wait for them
    ///
    /// Tasks still running once `grace` has elapsed are aborted.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!("Prober {} stopped", name),
                Ok(Err(e)) => warn!("Prober {} task ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("Prober {} did not stop within {:?}, aborting", name, grace);
                    handle.abort();
                }
            }
        }
    }
}

/// Drive one prober: prepare, then cycle and sleep until shutdown
async fn drive<P: Prober>(
    prober: P,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<ProbeState>,
) {
    let name = prober.name();

    if let Err(e) = prober.prepare().await {
        warn!("Prober {} is unavailable and will not run: {:#}", name, e);
        state.send_replace(ProbeState::Stopped(StopReason::Unavailable(e.to_string())));
        return;
    }

    let interval = prober.interval();
    info!("Prober {} started (interval {:?})", name, interval);

    let mut cycle = 0;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        cycle += 1;
        state.send_replace(ProbeState::Running { cycle });
        let report = prober.run_cycle().await;
        debug!(prober = name, cycle, ?report, "cycle finished");

        state.send_replace(ProbeState::Sleeping { cycle });
        if interval.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Prober {} stopped after {} cycles", name, cycle);
    state.send_replace(ProbeState::Stopped(StopReason::Shutdown));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use anyhow::anyhow;

    use super::*;

    struct CountingProber {
        interval: Duration,
        cycles: Arc<AtomicU64>,
        available: bool,
    }

    #[async_trait]
    impl Prober for CountingProber {
        type Report = u64;

        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn prepare(&self) -> anyhow::Result<()> {
            if self.available { Ok(()) } else { Err(anyhow!("not installed")) }
        }

        async fn run_cycle(&self) -> u64 {
            self.cycles.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    fn counting(interval: Duration, available: bool) -> (CountingProber, Arc<AtomicU64>) {
        let cycles = Arc::new(AtomicU64::new(0));
        (CountingProber { interval, cycles: cycles.clone(), available }, cycles)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_follow_interval() {
        let (prober, cycles) = counting(Duration::from_secs(10), true);
        let mut scheduler = ProbeScheduler::new();
        let status = scheduler.spawn(prober);

        // Cycles start at t=0, 10, 20, 30
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 4);
        assert_eq!(status.cycles(), 4);
        assert_eq!(status.state(), ProbeState::Sleeping { cycle: 4 });

        scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(status.state(), ProbeState::Stopped(StopReason::Shutdown));
        assert_eq!(cycles.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_prober_stops_without_cycling() {
        let (prober, cycles) = counting(Duration::from_secs(1), false);
        let mut scheduler = ProbeScheduler::new();
        let mut status = scheduler.spawn(prober);

        assert_eq!(status.stopped().await, StopReason::Unavailable("not installed".into()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 0);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_stopped_prober_does_not_affect_another() {
        let (broken, _) = counting(Duration::from_secs(1), false);
        let (healthy, cycles) = counting(Duration::from_secs(1), true);
        let mut scheduler = ProbeScheduler::new();
        let mut broken_status = scheduler.spawn(broken);
        let healthy_status = scheduler.spawn(healthy);

        broken_status.stopped().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 3);
        assert!(matches!(healthy_status.state(), ProbeState::Sleeping { .. }));

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_zero_interval_runs_back_to_back_until_shutdown() {
        let (prober, cycles) = counting(Duration::ZERO, true);
        let mut scheduler = ProbeScheduler::new();
        let mut status = scheduler.spawn(prober);

        while cycles.load(Ordering::SeqCst) < 50 {
            tokio::task::yield_now().await;
        }

        scheduler.shutdown(Duration::from_secs(5)).await;
        assert_eq!(status.stopped().await, StopReason::Shutdown);
    }
}
