use std::io::Error as IoError;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors that stop the process
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store initialization failed: {0}")]
    Store(#[from] StoreError),
    #[error("startup failed: {0:#}")]
    Startup(#[from] anyhow::Error),
}
