// SPDX-License-Identifier: AGPL-3.0

use chrono::Utc;
use dronering_core::domain::membership::MembershipStore;
use dronering_core::domain::reports::{CompletedDelivery, FleetStats};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Accumulator {
    deliveries: u64,
    km_travelled: f64,
    pollution: f64,
}

/// Master-side aggregation of completed deliveries into periodic
/// [`FleetStats`]. Averages are per known drone, pollution is per delivery.
pub struct FleetStatsTracker {
    store: Arc<MembershipStore>,
    current: Mutex<Accumulator>,
}

impl FleetStatsTracker {
    pub fn new(store: Arc<MembershipStore>) -> Self {
        Self {
            store,
            current: Mutex::new(Accumulator::default()),
        }
    }

    pub fn record(&self, report: &CompletedDelivery) {
        let mut current = self.current.lock();
        current.deliveries += 1;
        current.km_travelled += report.distance_travelled;
        current.pollution += report.mean_pollution();
    }

    /// Close the current interval and start a new one.
    pub fn take_report(&self) -> FleetStats {
        let interval = std::mem::take(&mut *self.current.lock());
        let drones = self.store.len();
        let batteries: Vec<f64> = self
            .store
            .known_statuses()
            .into_iter()
            .map(|(_, status)| f64::from(status.battery_percent))
            .collect();

        let per_drone = |total: f64| if drones == 0 { 0.0 } else { total / drones as f64 };
        FleetStats {
            timestamp: Utc::now(),
            average_deliveries: per_drone(interval.deliveries as f64),
            average_km_travelled: per_drone(interval.km_travelled),
            average_pollution: if interval.deliveries == 0 {
                0.0
            } else {
                interval.pollution / interval.deliveries as f64
            },
            average_battery_level: if batteries.is_empty() {
                0.0
            } else {
                batteries.iter().sum::<f64>() / batteries.len() as f64
            },
        }
    }
}
