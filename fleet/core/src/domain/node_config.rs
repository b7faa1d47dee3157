// SPDX-License-Identifier: AGPL-3.0

// Fleet Configuration Types
//
// Defines the configuration schema for a dronering fleet member, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Protocol timing (RPC deadline, heartbeat, delivery, charging, stats)
// - Battery model
// - Master-failover retry policy
// - Pollution window shape
// - Local simulation settings used by the `dronering` binary

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "dronering/v1";
pub const KIND: &str = "FleetConfig";

/// Top-level Kubernetes-style fleet configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfigManifest {
    /// API version (must be "dronering/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "FleetConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: FleetConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfigSpec {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub battery: BatteryConfig,

    #[serde(default)]
    pub failover: FailoverConfig,

    #[serde(default)]
    pub pollution: PollutionConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Deadline applied to every peer RPC except lock requests
    #[serde(with = "humantime_serde", default = "default_rpc_deadline")]
    pub rpc_deadline: Duration,

    /// How often a slave pings the master
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Simulated transit time of a single delivery
    #[serde(with = "humantime_serde", default = "default_delivery_duration")]
    pub delivery_duration: Duration,

    /// Time spent in the charging area once the lock is held
    #[serde(with = "humantime_serde", default = "default_charging_duration")]
    pub charging_duration: Duration,

    /// Period of the master's fleet statistics report
    #[serde(with = "humantime_serde", default = "default_stats_interval")]
    pub stats_interval: Duration,

    /// Upper bound on how long a master waits for pending orders at shutdown
    #[serde(with = "humantime_serde", default = "default_shutdown_drain_timeout")]
    pub shutdown_drain_timeout: Duration,

    /// How long a drone waits for an election round to produce a master
    /// before starting a fresh round
    #[serde(with = "humantime_serde", default = "default_election_timeout")]
    pub election_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Battery percentage consumed by one delivery
    #[serde(default = "default_delivery_cost")]
    pub delivery_cost: u8,

    /// Below this percentage a drone stops taking orders and shuts down
    #[serde(default = "default_low_threshold")]
    pub low_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    /// `None` retries until a master answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollutionConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,

    /// Sensor sampling period
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub sample_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of drones the binary spins up
    #[serde(default = "default_drones")]
    pub drones: u32,

    /// First port handed out to simulated drones
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Period of the simulated order generator
    #[serde(with = "humantime_serde", default = "default_order_interval")]
    pub order_interval: Duration,
}

fn default_rpc_deadline() -> Duration {
    Duration::from_secs(3)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_delivery_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_charging_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_drain_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_election_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_delivery_cost() -> u8 {
    10
}

fn default_low_threshold() -> u8 {
    crate::domain::status::LOW_BATTERY_THRESHOLD
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_window_size() -> usize {
    8
}

fn default_window_overlap() -> usize {
    4
}

fn default_sample_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_drones() -> u32 {
    4
}

fn default_base_port() -> u16 {
    10_000
}

fn default_order_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rpc_deadline: default_rpc_deadline(),
            heartbeat_interval: default_heartbeat_interval(),
            delivery_duration: default_delivery_duration(),
            charging_duration: default_charging_duration(),
            stats_interval: default_stats_interval(),
            shutdown_drain_timeout: default_shutdown_drain_timeout(),
            election_timeout: default_election_timeout(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            delivery_cost: default_delivery_cost(),
            low_threshold: default_low_threshold(),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            max_attempts: None,
        }
    }
}

impl Default for PollutionConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_overlap: default_window_overlap(),
            sample_interval: default_sample_interval(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            drones: default_drones(),
            base_port: default_base_port(),
            order_interval: default_order_interval(),
        }
    }
}

impl Default for FleetConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "local-fleet".to_string(),
                labels: None,
            },
            spec: FleetConfigSpec::default(),
        }
    }
}

impl FleetConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. DRONERING_CONFIG_PATH environment variable
    /// 2. ./dronering.yaml (working directory)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DRONERING_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./dronering.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DRONERING_RPC_DEADLINE_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: DRONERING_RPC_DEADLINE_MS={}", ms);
                    self.spec.timing.rpc_deadline = Duration::from_millis(ms);
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for DRONERING_RPC_DEADLINE_MS: '{}'. Expected milliseconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.timing.rpc_deadline.is_zero() {
            anyhow::bail!("spec.timing.rpc_deadline must be greater than zero");
        }

        if self.spec.timing.election_timeout <= self.spec.timing.rpc_deadline {
            anyhow::bail!("spec.timing.election_timeout must exceed rpc_deadline");
        }

        if self.spec.battery.low_threshold > 100 {
            anyhow::bail!("spec.battery.low_threshold must be a percentage");
        }

        let pollution = &self.spec.pollution;
        if pollution.window_size == 0 || pollution.window_size <= pollution.window_overlap {
            anyhow::bail!(
                "spec.pollution.window_size ({}) must be greater than window_overlap ({})",
                pollution.window_size,
                pollution.window_overlap
            );
        }

        let failover = &self.spec.failover;
        if failover.initial_backoff > failover.max_backoff {
            anyhow::bail!("spec.failover.initial_backoff cannot exceed max_backoff");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = FleetConfigManifest::default();
        assert_eq!(manifest.api_version, "dronering/v1");
        assert_eq!(manifest.kind, "FleetConfig");
        assert_eq!(manifest.spec.timing.rpc_deadline, Duration::from_secs(3));
        assert_eq!(manifest.spec.battery.low_threshold, 15);
        assert_eq!(manifest.spec.pollution.window_size, 8);
        assert!(manifest.spec.failover.max_attempts.is_none());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: dronering/v1
kind: FleetConfig
metadata:
  name: test-fleet
spec:
  timing:
    rpc_deadline: 750ms
    delivery_duration: 2s
  failover:
    max_attempts: 4
"#;
        let manifest = FleetConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "test-fleet");
        assert_eq!(manifest.spec.timing.rpc_deadline, Duration::from_millis(750));
        assert_eq!(manifest.spec.timing.delivery_duration, Duration::from_secs(2));
        assert_eq!(manifest.spec.timing.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(manifest.spec.failover.max_attempts, Some(4));
        assert_eq!(manifest.spec.battery.delivery_cost, 10);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut manifest = FleetConfigManifest::default();
        manifest.spec.simulation.drones = 7;
        let yaml = manifest.to_yaml_string().unwrap();
        let parsed = FleetConfigManifest::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.spec.simulation.drones, 7);
        assert_eq!(parsed.spec.timing.charging_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_validation() {
        let mut manifest = FleetConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.timing.rpc_deadline = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.timing.rpc_deadline = Duration::from_secs(1);

        manifest.spec.pollution.window_overlap = 8;
        assert!(manifest.validate().is_err());
        manifest.spec.pollution.window_overlap = 4;

        manifest.spec.failover.initial_backoff = Duration::from_secs(30);
        assert!(manifest.validate().is_err());
        manifest.spec.failover.initial_backoff = Duration::from_millis(10);

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        std::fs::write(
            &path,
            "apiVersion: dronering/v1\nkind: FleetConfig\nmetadata:\n  name: from-file\n",
        )
        .unwrap();
        let manifest = FleetConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(manifest.metadata.name, "from-file");
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = FleetConfigManifest::load_or_default(Some(PathBuf::from(
            "/definitely/not/here/dronering.yaml",
        )));
        assert!(result.is_err());
    }
}
