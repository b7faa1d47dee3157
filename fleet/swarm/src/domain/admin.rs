// SPDX-License-Identifier: AGPL-3.0
//! Admin service contract: registration, deregistration, fleet statistics.

use async_trait::async_trait;
use dronering_core::domain::drone::{DroneId, DroneIdentifier};
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::reports::FleetStats;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdminError {
    #[error("drone id {0} is already registered")]
    Conflict(DroneId),

    #[error("admin service unavailable: {0}")]
    Unavailable(String),
}

/// What a drone learns when it registers.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub start_position: CityPoint,
    /// Every registered drone, the newcomer included.
    pub members: Vec<DroneIdentifier>,
}

#[async_trait]
pub trait AdminService: Send + Sync {
    async fn register_drone(&self, drone: &DroneIdentifier) -> Result<Registration, AdminError>;

    async fn deregister_drone(&self, drone: &DroneIdentifier) -> Result<(), AdminError>;

    async fn report_fleet_stats(&self, stats: FleetStats) -> Result<(), AdminError>;
}
