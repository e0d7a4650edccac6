//! Gateway configuration
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - `fpgate.toml` in the working directory (or the file given with `--config`)
//! - `FPGATE_*` environment variables, `__` separating sections
//!   (`FPGATE_DEVICE__LOCK_WAIT_MS=2000`)
//! - command line overrides

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use fpgate_core::constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS, NOT_IDENTIFIED};
use fpgate_core::{IdentifyOptions, ReaderConfig, SimulatedScanner};
use fpgate_transport::Pacing;

use crate::error::{Error, Result};

/// Config file looked up when none is given
pub const DEFAULT_CONFIG_FILE: &str = "fpgate.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "FPGATE_";

/// Complete gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub identify: IdentifyConfig,
    pub simulator: SimulatorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

/// Device call policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Blocking workers for driver calls
    pub workers: usize,

    /// Bound on a single driver call
    pub call_timeout_ms: Option<u64>,

    /// Bound on waiting for the device lock
    pub lock_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyConfig {
    pub max_attempts: u32,

    /// Driver value meaning "not identified"
    pub sentinel: String,

    pub pacing: Pacing,
}

/// Behaviour of the simulated reader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Identify results played back in order
    pub responses: Vec<String>,

    /// Identify result once `responses` runs out (defaults to the sentinel)
    pub fallback: Option<String>,

    /// Duration of each simulated capture
    pub delay_ms: u64,

    /// Make every enrollment fail
    pub fail_enroll: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            call_timeout_ms: None,
            lock_wait_ms: None,
        }
    }
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sentinel: NOT_IDENTIFIED.to_string(),
            pacing: Pacing::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Command line overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub max_attempts: Option<u32>,
    pub pacing: Option<String>,
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// Load defaults, `fpgate.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::load_with_overrides(None, Overrides::default())
    }

    /// Load defaults and one config file, ignoring the environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = Self::existing(path.as_ref())?;

        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path));

        Self::extract(figment)
    }

    /// Load every layer, with `config` replacing the default file
    pub fn load_with_overrides(config: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = match config {
            Some(path) => Self::existing(path)?,
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(bind) = overrides.bind {
            figment = figment.merge(("server.bind", bind));
        }
        if let Some(max) = overrides.max_attempts {
            figment = figment.merge(("identify.max_attempts", max));
        }
        if let Some(pacing) = overrides.pacing {
            figment = figment.merge(("identify.pacing", pacing));
        }
        if let Some(filter) = overrides.log_filter {
            figment = figment.merge(("log.filter", filter));
        }

        Self::extract(figment)
    }

    fn existing(path: &Path) -> Result<PathBuf> {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Ok(path.to_path_buf())
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.identify.max_attempts == 0 {
            return Err(Error::Config("identify.max_attempts must be at least 1".into()));
        }

        if self.identify.sentinel.trim().is_empty() {
            return Err(Error::Config("identify.sentinel must not be empty".into()));
        }

        if self.device.workers == 0 {
            return Err(Error::Config("device.workers must be at least 1".into()));
        }

        self.bind_addr()?;

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid server.bind '{}': {}", self.server.bind, e)))
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            workers: self.device.workers,
            call_timeout: self.device.call_timeout_ms.map(Duration::from_millis),
            lock_wait: self.device.lock_wait_ms.map(Duration::from_millis),
        }
    }

    pub fn identify_options(&self) -> IdentifyOptions {
        IdentifyOptions {
            max_attempts: self.identify.max_attempts,
            sentinel: self.identify.sentinel.clone(),
        }
    }

    /// Build the simulated reader described by `[simulator]`
    pub fn simulator(&self) -> SimulatedScanner {
        let sim = &self.simulator;
        let fallback = sim
            .fallback
            .clone()
            .unwrap_or_else(|| self.identify.sentinel.clone());

        SimulatedScanner::new()
            .with_reads(sim.responses.iter().cloned())
            .with_fallback(fallback)
            .with_delay(Duration::from_millis(sim.delay_ms))
            .with_failing_enroll(sim.fail_enroll)
    }
}
