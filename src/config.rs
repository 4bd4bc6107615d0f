//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `agent.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ReportingConfig: Where and how often the telemetry record is sent.
//!     - LocationConfig: Which position provider to use (gpsd / fixed / disabled).
//!     - BatteryConfig: Power-supply sysfs root and poll cadence.
//!     - ManagedSettings: Managed configuration document and its namespace key.
//!     - DeviceConfig: Files holding the stable device identifier.
//!     - ConsentConfig: Where the terms-accepted flag is persisted.
//!     - DashboardConfig: Local status page.
//!     - LoggingConfig: Log level and per-tick snapshot logging.
//!
//!     every section is optional; missing values take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::managed::DEFAULT_NAMESPACE_KEY;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub reporting: ReportingConfig,
    pub location: LocationConfig,
    pub battery: BatteryConfig,
    pub managed: ManagedSettings,
    pub device: DeviceConfig,
    pub consent: ConsentConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportingConfig {
    pub endpoint: String,
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationProvider {
    #[default]
    Gpsd,
    Fixed,
    Disabled,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocationConfig {
    pub provider: LocationProvider,
    pub gpsd_address: String,
    /// wait between gpsd connection attempts
    pub gpsd_reconnect_seconds: u64,
    // only for provider = "fixed"
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatteryConfig {
    pub power_supply_path: PathBuf,
    pub poll_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ManagedSettings {
    pub path: PathBuf,
    pub namespace_key: String,
    pub recheck_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub id_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsentConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_telemetry: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://telemetry.example.com/functions/v1/update-device-location"
                .to_string(),
            interval_seconds: 60,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: LocationProvider::Gpsd,
            gpsd_address: "127.0.0.1:2947".to_string(),
            gpsd_reconnect_seconds: 10,
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            power_supply_path: PathBuf::from("/sys/class/power_supply"),
            poll_seconds: 30,
        }
    }
}

impl Default for ManagedSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config").join("managed.json"),
            namespace_key: DEFAULT_NAMESPACE_KEY.to_string(),
            recheck_seconds: 300,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id_paths: vec![
                PathBuf::from("/etc/machine-id"),
                PathBuf::from("/var/lib/dbus/machine-id"),
            ],
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state").join("consent.json"),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
            title: "Device Beacon".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_telemetry: false,
        }
    }
}

/// where the running configuration came from
#[derive(Debug)]
pub enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    /// a file was found but could not be used
    Rejected { path: PathBuf, error: String },
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// an explicit path wins; otherwise config/agent.toml then
    /// ../config/agent.toml. logging is not up yet, so the origin is returned
    /// for the caller to report.
    pub fn load_or_default(explicit: Option<PathBuf>) -> (Self, ConfigOrigin) {
        let paths = match explicit {
            Some(path) => vec![path],
            None => vec![
                PathBuf::from("config").join("agent.toml"),
                PathBuf::from("..").join("config").join("agent.toml"),
            ],
        };

        for path in paths {
            if path.exists() {
                return match Self::load(&path) {
                    Ok(config) => (config, ConfigOrigin::File(path)),
                    Err(e) => (
                        Self::default(),
                        ConfigOrigin::Rejected {
                            path,
                            error: e.to_string(),
                        },
                    ),
                };
            }
        }

        (Self::default(), ConfigOrigin::Defaults)
    }

    /// Log configuration summary
    pub fn log_summary(&self, origin: &ConfigOrigin) {
        match origin {
            ConfigOrigin::File(path) => info!("config loaded from {}", path.display()),
            ConfigOrigin::Defaults => warn!("no config file found, using defaults"),
            ConfigOrigin::Rejected { path, error } => {
                warn!("failed to load {}: {} (using defaults)", path.display(), error)
            }
        }
        info!(
            endpoint = %self.reporting.endpoint,
            interval_seconds = self.reporting.interval_seconds,
            location = ?self.location.provider,
            managed = %self.managed.path.display(),
            dashboard = self.dashboard.enabled,
            "configuration"
        );
    }
}
