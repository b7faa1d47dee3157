// SPDX-License-Identifier: AGPL-3.0
//! In-process fleet: drones talking over a [`LocalNetwork`], registered with
//! an [`InMemoryAdminService`] and fed by a [`PeriodicOrderSource`].

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::node_config::FleetConfigManifest;
use dronering_core::infrastructure::event_bus::EventBus;
use dronering_swarm::application::{Drone, DroneSettings};
use dronering_swarm::domain::middleware::{PeerClient, PeerServer};
use dronering_swarm::domain::order_source::OrderSource;
use dronering_swarm::infrastructure::{
    DeadlineClient, InMemoryAdminService, LocalNetwork, PeriodicOrderSource,
};

pub struct SimulatedFleet {
    admin: InMemoryAdminService,
    events: EventBus,
    drones: Vec<Arc<Drone>>,
}

impl SimulatedFleet {
    /// Start `count` drones with ids `1..=count`, one after the other.
    pub async fn launch(config: &FleetConfigManifest, count: u32) -> Result<Self> {
        anyhow::ensure!(count > 0, "a fleet needs at least one drone");
        let simulation = &config.spec.simulation;
        let last_port = u32::from(simulation.base_port) + count - 1;
        anyhow::ensure!(
            last_port <= u32::from(u16::MAX),
            "{count} drones do not fit above base port {}",
            simulation.base_port
        );

        let network = LocalNetwork::new();
        let admin = InMemoryAdminService::new();
        let events = EventBus::with_default_capacity();
        let orders: Arc<dyn OrderSource> =
            Arc::new(PeriodicOrderSource::new(simulation.order_interval));
        let settings = DroneSettings::from(config);

        let mut drones = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let me = DroneIdentifier::new(
                offset + 1,
                "localhost",
                simulation.base_port + offset as u16,
            );
            let transport: Arc<dyn PeerClient> = Arc::new(network.client_for(&me));
            let client: Arc<dyn PeerClient> = Arc::new(DeadlineClient::new(
                transport,
                config.spec.timing.rpc_deadline,
            ));
            let drone = Drone::new(
                me.clone(),
                settings.clone(),
                client,
                Arc::new(admin.clone()),
                Arc::clone(&orders),
                events.clone(),
            );
            let server: Arc<dyn PeerServer> = drone.clone();
            network.bind(&me, Arc::downgrade(&server));
            drone
                .start()
                .await
                .with_context(|| format!("Drone {me} failed to start"))?;

            // a drone that retired on its own must stop answering
            let retired = Arc::clone(&drone);
            let links = Arc::clone(&network);
            tokio::spawn(async move {
                retired.terminated().await;
                links.unbind(retired.identifier());
            });
            drones.push(drone);
        }

        info!(drones = drones.len(), "Fleet launched");
        Ok(Self {
            admin,
            events,
            drones,
        })
    }

    pub fn len(&self) -> usize {
        self.drones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }

    pub fn drones(&self) -> &[Arc<Drone>] {
        &self.drones
    }

    pub fn admin(&self) -> &InMemoryAdminService {
        &self.admin
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shut every drone down concurrently and wait until all have left.
    pub async fn shutdown(&self) {
        join_all(self.drones.iter().map(|drone| async move {
            drone.shutdown().await;
            drone.terminated().await;
        }))
        .await;
        info!("Fleet shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronering_swarm::application::RoleKind;
    use std::time::Duration;

    fn fast_config() -> FleetConfigManifest {
        let mut config = FleetConfigManifest::default();
        config.spec.timing.delivery_duration = Duration::from_secs(1);
        config.spec.timing.shutdown_drain_timeout = Duration::from_secs(5);
        config.spec.simulation.order_interval = Duration::from_millis(500);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_launches_and_lands() {
        let fleet = SimulatedFleet::launch(&fast_config(), 3).await.unwrap();
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.drones()[0].role(), RoleKind::Master);
        assert_eq!(fleet.admin().registered().await.len(), 3);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::time::timeout(Duration::from_secs(120), fleet.shutdown())
            .await
            .expect("shutdown must complete");

        assert!(fleet.admin().registered().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_fleet_is_rejected() {
        assert!(SimulatedFleet::launch(&fast_config(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_port_overflow_is_rejected() {
        let mut config = fast_config();
        config.spec.simulation.base_port = u16::MAX;
        assert!(SimulatedFleet::launch(&config, 2).await.is_err());
    }
}
