//! Daemon configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use monitor_lib::{EngineConfig, Thresholds};
use serde::Deserialize;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "monitor.toml";

/// Daemon configuration
///
/// Read from an optional TOML file, then overridden by `MONITOR_*`
/// environment variables (e.g. `MONITOR_API_PORT=9090`).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Instance name carried by logs and webhook labels
    #[serde(default = "default_instance")]
    pub instance: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_baseline_interval")]
    pub baseline_interval_secs: u64,

    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,

    #[serde(default = "default_alert_retention_days")]
    pub alert_retention_days: u64,

    /// Raw activity events are kept this long
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u64,

    #[serde(default = "default_auto_resolve")]
    pub auto_resolve_secs: u64,

    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    #[serde(default = "default_detector_timeout")]
    pub detector_timeout_secs: u64,

    /// Alertmanager-compatible receiver; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_dedup")]
    pub webhook_dedup_secs: u64,

    /// cgroup v2 directory of the monitored process
    #[serde(default = "default_cgroup_path")]
    pub cgroup_path: PathBuf,

    /// JSON file with initial thresholds, merged over the defaults
    #[serde(default)]
    pub thresholds_file: Option<PathBuf>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "anomaly-monitor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_scan_interval() -> u64 {
    30
}

fn default_baseline_interval() -> u64 {
    600
}

fn default_retention_interval() -> u64 {
    3600
}

fn default_alert_retention_days() -> u64 {
    7
}

fn default_event_retention_days() -> u64 {
    90
}

fn default_auto_resolve() -> u64 {
    3600
}

fn default_notify_timeout() -> u64 {
    5
}

fn default_detector_timeout() -> u64 {
    10
}

fn default_webhook_dedup() -> u64 {
    15 * 60
}

fn default_cgroup_path() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

const DAY_SECS: u64 = 24 * 60 * 60;

impl MonitorConfig {
    /// Load from `$MONITOR_CONFIG` (default `monitor.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from the given file (which may be absent) and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("invalid monitor configuration")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            baseline_interval: Duration::from_secs(self.baseline_interval_secs),
            retention_interval: Duration::from_secs(self.retention_interval_secs),
            alert_retention: Duration::from_secs(self.alert_retention_days * DAY_SECS),
            event_retention: Duration::from_secs(self.event_retention_days * DAY_SECS),
            auto_resolve_after: Duration::from_secs(self.auto_resolve_secs),
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
            detector_timeout: Duration::from_secs(self.detector_timeout_secs),
        }
    }

    pub fn webhook_dedup_window(&self) -> Duration {
        Duration::from_secs(self.webhook_dedup_secs)
    }

    /// Initial thresholds: defaults, with the thresholds file merged on top
    pub fn load_thresholds(&self) -> Result<Thresholds> {
        let Some(path) = &self.thresholds_file else {
            return Ok(Thresholds::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read thresholds file {}", path.display()))?;
        let patch: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("thresholds file {} is not valid JSON", path.display()))?;
        Thresholds::default()
            .merged(&patch)
            .with_context(|| format!("invalid thresholds in {}", path.display()))
    }
}
