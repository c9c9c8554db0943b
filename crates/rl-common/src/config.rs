//! ---
//! rl_section: "01-shared-runtime"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Shared primitives and utilities for the client tooling."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_speed() -> u32 {
    1
}

fn default_ff_prerace() -> bool {
    true
}

fn default_page_size() -> i32 {
    100
}

/// Primary configuration object for the `rlctl` binary.
///
/// Values can be loaded from a TOML file (see [`CliConfig::load`]) and are
/// individually overridable via command line flags.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Destination server address (`host:port`).
    #[serde(default)]
    pub addr: String,
    /// Connect to the destination without TLS (development only).
    #[serde(default)]
    pub insecure: bool,
    /// Authentication token sent as `api-token` metadata with every call.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub replay: ReplayDefaults,
}

/// Metadata describing where a [`CliConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedCliConfig {
    pub config: CliConfig,
    pub source: Option<PathBuf>,
}

impl CliConfig {
    pub const ENV_CONFIG_PATH: &'static str = "RLCTL_CONFIG";

    /// Load configuration from disk, respecting the `RLCTL_CONFIG` override.
    ///
    /// A missing file is not an error: the CLI is fully operable from flags
    /// alone, so absent candidates yield the default configuration.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedCliConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedCliConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedCliConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        Ok(LoadedCliConfig {
            config: CliConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<CliConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.tls.validate()?;
        self.replay.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for CliConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: CliConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// TLS material used when dialing gRPC endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsSettings {
    /// Custom root CA certificate (PEM).
    #[serde(default)]
    pub ca: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS.
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Client key (PEM) for mutual TLS.
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Override the domain name used for certificate verification.
    #[serde(default)]
    pub domain: Option<String>,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<()> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(anyhow!("tls cert and key must be configured together"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// When set, a rolling daily log file is written below this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
            file_prefix: None,
        }
    }
}

/// Default replay parameters, overridable per invocation.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayDefaults {
    /// Playback speed multiplier; 0 means "as fast as possible".
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Initial span of event time replayed without pacing delay.
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub fast_forward: Option<Duration>,
    /// Skip pacing delays for records outside a race session.
    #[serde(default = "default_ff_prerace")]
    pub ff_prerace: bool,
    /// Ask the destination not to persist the replayed data.
    #[serde(default)]
    pub do_not_persist: bool,
    /// Page size used when fetching recorded data.
    #[serde(default = "default_page_size")]
    pub page_size: i32,
}

impl Default for ReplayDefaults {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            fast_forward: None,
            ff_prerace: default_ff_prerace(),
            do_not_persist: false,
            page_size: default_page_size(),
        }
    }
}

impl ReplayDefaults {
    pub fn validate(&self) -> Result<()> {
        if self.page_size <= 0 {
            return Err(anyhow!("replay page_size must be positive"));
        }
        Ok(())
    }
}
