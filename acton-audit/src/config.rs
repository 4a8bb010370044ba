//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `ACTON_AUDIT_`, `__` separates nested keys)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/acton-audit/config.toml
//! 4. System directory: /etc/acton-audit/config.toml
//! 5. Default values
//!
//! Settings live under the `[audit]` table:
//!
//! ```toml
//! [audit]
//! log_level = "info"
//!
//! [[audit.sinks]]
//! type = "rotating_file"
//! directory = "/var/log/myapp"
//! max_bytes = 10485760
//! backup_count = 10
//!
//! [audit.sinks.control]
//! enabled = true
//! request_fields = { request_path = "path", request_method = "method" }
//! response_fields = { response_status = "status" }
//!
//! [[audit.sinks]]
//! type = "syslog"
//! host = "syslog.internal"
//! transport = "tcp"
//! facility = "local0"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sink::{AuditSink, RotatingFileOptions, RotatingFileSink, SyslogOptions, SyslogSink};

/// Table holding the audit settings in a config file
pub const CONFIG_TABLE: &str = "audit";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ACTON_AUDIT_";

const APP_DIR: &str = "acton-audit";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level filter for [`init_tracing`](crate::observability::init_tracing)
    pub log_level: String,

    /// Sinks, in dispatch order
    pub sinks: Vec<SinkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            sinks: Vec::new(),
        }
    }
}

/// One configured sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Rotating log file
    RotatingFile(RotatingFileOptions),
    /// Syslog collector
    Syslog(SyslogOptions),
}

impl SinkConfig {
    /// Sink name
    pub fn name(&self) -> &str {
        match self {
            SinkConfig::RotatingFile(options) => &options.name,
            SinkConfig::Syslog(options) => &options.name,
        }
    }

    /// Construct the sink
    pub fn build(&self) -> Result<Arc<dyn AuditSink>> {
        let sink: Arc<dyn AuditSink> = match self {
            SinkConfig::RotatingFile(options) => {
                Arc::new(RotatingFileSink::new(options.clone())?)
            }
            SinkConfig::Syslog(options) => Arc::new(SyslogSink::new(options.clone())),
        };
        Ok(sink)
    }

    fn validate(&self) -> Result<()> {
        match self {
            SinkConfig::RotatingFile(options) if options.filename.trim().is_empty() => Err(
                Error::InvalidConfig(format!("sink '{}': filename is empty", options.name)),
            ),
            SinkConfig::Syslog(options) if options.host.trim().is_empty() => Err(
                Error::InvalidConfig(format!("sink '{}': host is empty", options.name)),
            ),
            _ => Ok(()),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Files are merged lowest priority first, so `./config.toml` overrides
    /// the XDG file, which overrides `/etc`. Environment variables override
    /// every file.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in Self::find_config_paths().iter().rev() {
            if path.exists() {
                tracing::info!("Loading audit configuration from: {}", path.display());
                figment = figment.merge(Self::file_provider(path));
            }
        }

        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Skips the search path. A missing file yields the defaults (plus any
    /// environment overrides).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Self::file_provider(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Check settings that serde cannot
    ///
    /// Sink names must be unique since they key allow-lists and per-sink
    /// overrides.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for sink in &self.sinks {
            if !seen.insert(sink.name()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate audit sink name '{}'",
                    sink.name()
                )));
            }
            sink.validate()?;
        }
        Ok(())
    }

    fn file_provider(path: &Path) -> Figment {
        Figment::from(Toml::file(path)).focus(CONFIG_TABLE)
    }

    /// Config file locations in priority order (highest first)
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_DIR);
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc").join(APP_DIR).join("config.toml"));
        paths
    }
}
