//! Process supervisor - wires every component together
//!
//! The supervisor:
//! - Opens and initializes the observation store (the only fatal step)
//! - Spawns the reachability and throughput probers on the scheduler
//! - Serves the HTTP read API until the server stops
//! - Signals the probers to finish their current cycle and exit

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use tracing::{error, info};

use crate::api;
use crate::config::Config;
use crate::error::AppError;
use crate::pool::open_pool;
use crate::probe::{
    PingCommand, ReachabilityCheck, ReachabilityProber, SpeedtestCli, ThroughputBackend,
    ThroughputProber,
};
use crate::query::QueryService;
use crate::scheduler::{ProbeScheduler, ProbeStatus};
use crate::store::{LibsqlStore, ObservationStore};

/// How long probers get to finish their current cycle on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Supervisor {
    config: Arc<Config>,
    store: Arc<dyn ObservationStore>,
    scheduler: ProbeScheduler,
    statuses: Vec<ProbeStatus>,
}

impl Supervisor {
    /// Create and run a supervisor with the production check and backend
    pub async fn start(config: Config) -> Result<(), AppError> {
        let supervisor = Self::new(config).await?;
        supervisor.run().await
    }

    /// Open the configured store and initialize its schema
    pub async fn new(config: Config) -> Result<Self, AppError> {
        info!("Opening observation store at {}", config.storage.path.display());
        let pool = open_pool(&config.storage.path).await?;
        let store: Arc<dyn ObservationStore> = Arc::new(LibsqlStore::new(pool));

        info!("Initializing database schema...");
        if let Err(e) = store.initialize().await {
            error!("Store initialization failed: {}", e);
            return Err(e.into());
        }

        Ok(Self::with_store(config, store))
    }

    /// Build a supervisor around an already-initialized store
    pub fn with_store(config: Config, store: Arc<dyn ObservationStore>) -> Self {
        Self { config: Arc::new(config), store, scheduler: ProbeScheduler::new(), statuses: Vec::new() }
    }

    pub fn query_service(&self) -> QueryService {
        QueryService::new(self.store.clone())
    }

    pub fn statuses(&self) -> &[ProbeStatus] {
        &self.statuses
    }

    /// Spawn both probers; `backend` is `None` when throughput probing is disabled
    pub fn spawn_probers(
        &mut self,
        checker: Arc<dyn ReachabilityCheck>,
        backend: Option<Arc<dyn ThroughputBackend>>,
    ) -> &[ProbeStatus] {
        let reachability = &self.config.reachability;
        info!(
            "Starting reachability prober: {} targets every {}s",
            reachability.targets.len(),
            reachability.interval_seconds
        );
        let prober = ReachabilityProber::new(
            self.store.clone(),
            checker,
            reachability.targets.clone(),
            reachability.timeout(),
            reachability.interval(),
        );
        self.statuses.push(self.scheduler.spawn(prober));

        match backend {
            Some(backend) => {
                let throughput = &self.config.throughput;
                info!("Starting throughput prober every {}s", throughput.interval_seconds);
                let prober = ThroughputProber::new(
                    self.store.clone(),
                    backend,
                    throughput.timeout(),
                    throughput.interval(),
                );
                self.statuses.push(self.scheduler.spawn(prober));
            }
            None => info!("Throughput probing is disabled"),
        }

        &self.statuses
    }

    /// Run probers and the HTTP API until the server stops
    pub async fn run(mut self) -> Result<(), AppError> {
        let checker: Arc<dyn ReachabilityCheck> = Arc::new(PingCommand::default());
        let backend: Option<Arc<dyn ThroughputBackend>> = if self.config.throughput.enabled {
            Some(Arc::new(SpeedtestCli::new(self.config.throughput.command.clone())))
        } else {
            None
        };
        self.spawn_probers(checker, backend);

        let served = serve(&self.config.http.bind, self.config.http.port, self.query_service()).await;
        if let Err(e) = &served {
            error!("HTTP server failed: {}", e);
        }

        info!("Shutting down probers...");
        self.shutdown().await;

        served.map_err(AppError::from)
    }

    /// Stop all probers after their current cycle
    pub async fn shutdown(self) {
        self.scheduler.shutdown(SHUTDOWN_GRACE).await;
    }
}

/// Serve the read API; returns once the server has stopped (SIGINT/SIGTERM)
pub async fn serve(bind: &str, port: u16, query: QueryService) -> std::io::Result<()> {
    info!("Serving API on {}:{}", bind, port);
    let data = web::Data::new(query);

    HttpServer::new(move || App::new().app_data(data.clone()).configure(api::routes))
        .bind((bind, port))?
        .run()
        .await
}
