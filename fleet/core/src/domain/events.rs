// SPDX-License-Identifier: AGPL-3.0

use crate::domain::drone::DroneIdentifier;
use crate::domain::order::OrderId;
use crate::domain::reports::FleetStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observable things a single drone does or learns about the fleet.
///
/// Published on the [`crate::infrastructure::event_bus::EventBus`]; purely
/// informational, no protocol decision depends on an event being delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    Registered {
        drone: DroneIdentifier,
        fleet_size: usize,
        at: DateTime<Utc>,
    },
    JoinedRing {
        drone: DroneIdentifier,
        known_master: Option<DroneIdentifier>,
        at: DateTime<Utc>,
    },
    PeerJoined {
        observer: DroneIdentifier,
        peer: DroneIdentifier,
        at: DateTime<Utc>,
    },
    PeerUnreachable {
        observer: DroneIdentifier,
        peer: DroneIdentifier,
        at: DateTime<Utc>,
    },
    BecameMaster {
        drone: DroneIdentifier,
        at: DateTime<Utc>,
    },
    MasterElected {
        observer: DroneIdentifier,
        master: DroneIdentifier,
        at: DateTime<Utc>,
    },
    OrderAccepted {
        drone: DroneIdentifier,
        order: OrderId,
        at: DateTime<Utc>,
    },
    OrderRefused {
        drone: DroneIdentifier,
        order: OrderId,
        at: DateTime<Utc>,
    },
    DeliveryCompleted {
        drone: DroneIdentifier,
        order: OrderId,
        battery_percent: u8,
        at: DateTime<Utc>,
    },
    ChargingStarted {
        drone: DroneIdentifier,
        at: DateTime<Utc>,
    },
    ChargingCompleted {
        drone: DroneIdentifier,
        at: DateTime<Utc>,
    },
    StatsReported {
        master: DroneIdentifier,
        stats: FleetStats,
    },
    ShutdownCompleted {
        drone: DroneIdentifier,
        at: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// The drone that emitted this event.
    pub fn source(&self) -> &DroneIdentifier {
        match self {
            FleetEvent::Registered { drone, .. }
            | FleetEvent::JoinedRing { drone, .. }
            | FleetEvent::BecameMaster { drone, .. }
            | FleetEvent::OrderAccepted { drone, .. }
            | FleetEvent::OrderRefused { drone, .. }
            | FleetEvent::DeliveryCompleted { drone, .. }
            | FleetEvent::ChargingStarted { drone, .. }
            | FleetEvent::ChargingCompleted { drone, .. }
            | FleetEvent::ShutdownCompleted { drone, .. } => drone,
            FleetEvent::PeerJoined { observer, .. }
            | FleetEvent::PeerUnreachable { observer, .. }
            | FleetEvent::MasterElected { observer, .. } => observer,
            FleetEvent::StatsReported { master, .. } => master,
        }
    }
}
