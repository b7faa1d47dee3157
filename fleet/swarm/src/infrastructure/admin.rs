// SPDX-License-Identifier: AGPL-3.0
//! In-memory admin service used by the simulation binary and by tests.

use crate::domain::admin::{AdminError, AdminService, Registration};
use async_trait::async_trait;
use dronering_core::domain::drone::{DroneId, DroneIdentifier};
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::reports::FleetStats;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registration table keyed by drone id plus the history of fleet reports.
#[derive(Clone, Default)]
pub struct InMemoryAdminService {
    drones: Arc<RwLock<BTreeMap<DroneId, DroneIdentifier>>>,
    stats: Arc<RwLock<Vec<FleetStats>>>,
}

impl InMemoryAdminService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn registered(&self) -> Vec<DroneIdentifier> {
        self.drones.read().await.values().cloned().collect()
    }

    pub async fn stats_history(&self) -> Vec<FleetStats> {
        self.stats.read().await.clone()
    }
}

#[async_trait]
impl AdminService for InMemoryAdminService {
    async fn register_drone(&self, drone: &DroneIdentifier) -> Result<Registration, AdminError> {
        let mut drones = self.drones.write().await;
        if drones.contains_key(&drone.id()) {
            return Err(AdminError::Conflict(drone.id()));
        }
        drones.insert(drone.id(), drone.clone());
        let start_position = CityPoint::random();
        info!(%drone, %start_position, fleet_size = drones.len(), "Drone registered");
        Ok(Registration {
            start_position,
            members: drones.values().cloned().collect(),
        })
    }

    async fn deregister_drone(&self, drone: &DroneIdentifier) -> Result<(), AdminError> {
        if self.drones.write().await.remove(&drone.id()).is_some() {
            info!(%drone, "Drone deregistered");
        }
        Ok(())
    }

    async fn report_fleet_stats(&self, stats: FleetStats) -> Result<(), AdminError> {
        info!(%stats, "Fleet statistics received");
        self.stats.write().await.push(stats);
        Ok(())
    }
}
