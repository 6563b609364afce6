use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid value for {name}: {value:?}")]
    InvalidOverride { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    pub reachability: Reachability,
    pub throughput: Throughput,
    pub http: Http,
    pub logging: Logging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reachability {
    /// Zero runs cycles back to back.
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Throughput {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub format: String,
    pub level: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self { path: "linkwatch.db".into() }
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            timeout_seconds: 5,
            targets: vec!["8.8.8.8".into(), "1.1.1.1".into(), "www.google.com".into()],
        }
    }
}

impl Default for Throughput {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            timeout_seconds: 120,
            command: "speedtest-cli".into(),
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { format: "compact".into(), level: "info".into() }
    }
}

impl Reachability {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Throughput {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/linkwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("linkwatch/config.toml"))
}

fn parse_override<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride { name, value })
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Storage")?;
        write_1(f, "Path", &self.storage.path.display())?;
        write_title_1(f, "Reachability")?;
        write_1(f, "Interval (s)", &self.reachability.interval_seconds)?;
        write_1(f, "Timeout (s)", &self.reachability.timeout_seconds)?;
        write_1(f, "Targets", &self.reachability.targets.join(", "))?;
        write_title_1(f, "Throughput")?;
        write_1(f, "Enabled", &self.throughput.enabled)?;
        write_1(f, "Interval (s)", &self.throughput.interval_seconds)?;
        write_1(f, "Timeout (s)", &self.throughput.timeout_seconds)?;
        write_1(f, "Command", &self.throughput.command)?;
        write_title_1(f, "HTTP")?;
        write_1(f, "Bind Address", &self.http.bind)?;
        write_1(f, "Port", &self.http.port)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Format", &self.logging.format)?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/linkwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `LINKWATCH_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// `FLASK_PORT` is honoured for deployments that still export it; `LINKWATCH_PORT` wins.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("FLASK_PORT") {
            self.http.port = parse_override("FLASK_PORT", value)?;
        }
        if let Some(value) = lookup("LINKWATCH_PORT") {
            self.http.port = parse_override("LINKWATCH_PORT", value)?;
        }
        if let Some(value) = lookup("LINKWATCH_DB") {
            self.storage.path = value.into();
        }
        if let Some(value) = lookup("LINKWATCH_PING_INTERVAL") {
            self.reachability.interval_seconds = parse_override("LINKWATCH_PING_INTERVAL", value)?;
        }
        if let Some(value) = lookup("LINKWATCH_SPEEDTEST_INTERVAL") {
            self.throughput.interval_seconds =
                parse_override("LINKWATCH_SPEEDTEST_INTERVAL", value)?;
        }
        Ok(())
    }

    /// Reject settings the probers cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reachability.targets.is_empty() {
            return Err(ConfigError::Invalid("reachability.targets must not be empty".into()));
        }
        if self.reachability.targets.iter().any(|target| target.trim().is_empty()) {
            return Err(ConfigError::Invalid("reachability.targets contains a blank entry".into()));
        }
        if let Some(target) = self.reachability.targets.iter().find(|t| t.starts_with('-')) {
            return Err(ConfigError::Invalid(format!("reachability target {target:?} looks like a flag")));
        }
        if self.reachability.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("reachability.timeout_seconds must be at least 1".into()));
        }
        if self.throughput.interval_seconds == 0 {
            return Err(ConfigError::Invalid("throughput.interval_seconds must be at least 1".into()));
        }
        if self.throughput.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("throughput.timeout_seconds must be at least 1".into()));
        }
        if self.throughput.enabled && self.throughput.command.trim().is_empty() {
            return Err(ConfigError::Invalid("throughput.command must not be empty".into()));
        }
        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port must not be 0".into()));
        }
        Ok(())
    }
}
