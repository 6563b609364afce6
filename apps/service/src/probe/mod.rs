//! Probers - the two sampling loops feeding the observation store
//!
//! - [`reachability`]: one pass/fail check per configured target per cycle
//! - [`throughput`]: one download/upload/latency benchmark per cycle
//!
//! Both hold an injected store handle and are driven by
//! [`ProbeScheduler`](crate::scheduler::ProbeScheduler).

pub mod reachability;
pub mod throughput;

pub use reachability::{CheckOutcome, PingCommand, ReachabilityCheck, ReachabilityProber};
pub use throughput::{
    BackendUnavailable, Measurement, SkipReason, SpeedtestCli, ThroughputBackend, ThroughputProber,
};
