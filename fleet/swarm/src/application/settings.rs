// SPDX-License-Identifier: AGPL-3.0

use dronering_core::domain::node_config::FleetConfigManifest;
use std::time::Duration;

/// Retry policy for reports that must reach whoever is master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// `None` keeps retrying until a master answers.
    pub max_attempts: Option<u32>,
}

impl FailoverPolicy {
    /// Pause before retry number `attempt + 1`. Doubles from
    /// `initial_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Per-drone tunables, derived from the fleet manifest.
#[derive(Debug, Clone)]
pub struct DroneSettings {
    pub heartbeat_interval: Duration,
    pub delivery_duration: Duration,
    pub charging_duration: Duration,
    pub stats_interval: Duration,
    pub shutdown_drain_timeout: Duration,
    pub election_timeout: Duration,
    pub delivery_cost: u8,
    pub low_battery_threshold: u8,
    pub failover: FailoverPolicy,
    pub pollution_window_size: usize,
    pub pollution_window_overlap: usize,
    pub pollution_sample_interval: Duration,
}

impl Default for DroneSettings {
    fn default() -> Self {
        Self::from(&FleetConfigManifest::default())
    }
}

impl From<&FleetConfigManifest> for DroneSettings {
    fn from(manifest: &FleetConfigManifest) -> Self {
        let spec = &manifest.spec;
        Self {
            heartbeat_interval: spec.timing.heartbeat_interval,
            delivery_duration: spec.timing.delivery_duration,
            charging_duration: spec.timing.charging_duration,
            stats_interval: spec.timing.stats_interval,
            shutdown_drain_timeout: spec.timing.shutdown_drain_timeout,
            election_timeout: spec.timing.election_timeout,
            delivery_cost: spec.battery.delivery_cost,
            low_battery_threshold: spec.battery.low_threshold,
            failover: FailoverPolicy {
                initial_backoff: spec.failover.initial_backoff,
                max_backoff: spec.failover.max_backoff,
                max_attempts: spec.failover.max_attempts,
            },
            pollution_window_size: spec.pollution.window_size,
            pollution_window_overlap: spec.pollution.window_overlap,
            pollution_sample_interval: spec.pollution.sample_interval,
        }
    }
}
