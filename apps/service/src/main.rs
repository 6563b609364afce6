use std::path::PathBuf;

use clap::Parser;
use linkwatch::{AppError, Config, Supervisor};

/// Continuously probe reachability and throughput and serve the samples over HTTP
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/linkwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port for the HTTP API
    #[arg(short, long)]
    port: Option<u16>,

    /// Database file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Do not run throughput measurements
    #[arg(long)]
    no_throughput: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(db) = &self.db {
            config.storage.path = db.clone();
        }
        if self.no_throughput {
            config.throughput.enabled = false;
        }
    }
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    cli.apply(&mut config);
    config.validate()?;

    logger::init_tracing(&config.logging.level, config.logging.format.parse().unwrap_or_default());

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    tracing::debug!("{}", config);
    Supervisor::start(config).await
}
