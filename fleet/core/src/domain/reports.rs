// SPDX-License-Identifier: AGPL-3.0
//! # Delivery and Fleet Reports
//!
//! Value objects flowing from drones to the master ([`CompletedDelivery`]) and
//! from the master to the admin service ([`FleetStats`]).

use crate::domain::drone::DroneIdentifier;
use crate::domain::order::Order;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sent by a drone to the master once an order has been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDelivery {
    pub timestamp: DateTime<Utc>,
    pub sender: DroneIdentifier,
    pub order: Order,
    pub distance_travelled: f64,
    /// Averaged pollution readings gathered since the previous report.
    pub pollution_samples: Vec<f64>,
    pub battery_percent: u8,
}

impl CompletedDelivery {
    /// Mean of the pollution samples, 0 when the sensor produced none.
    pub fn mean_pollution(&self) -> f64 {
        if self.pollution_samples.is_empty() {
            return 0.0;
        }
        self.pollution_samples.iter().sum::<f64>() / self.pollution_samples.len() as f64
    }
}

/// Periodic fleet-wide aggregate computed by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetStats {
    pub timestamp: DateTime<Utc>,
    pub average_deliveries: f64,
    pub average_km_travelled: f64,
    pub average_pollution: f64,
    pub average_battery_level: f64,
}

impl fmt::Display for FleetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} deliveries={:.2} km={:.2} pollution={:.2} battery={:.1}%]",
            self.timestamp.to_rfc3339(),
            self.average_deliveries,
            self.average_km_travelled,
            self.average_pollution,
            self.average_battery_level
        )
    }
}
