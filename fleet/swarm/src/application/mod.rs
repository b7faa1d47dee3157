// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Application Layer
//!
//! The coordination protocols and the drone that composes them.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`mutex`] | `DistributedMutex`, `LockStatus` |
//! | [`election`] | `ElectionManager`, `Candidate` |
//! | [`order_assigner`] | `OrderAssigner` |
//! | [`fleet_stats`] | `FleetStatsTracker` |
//! | [`drone`] | `Drone`, `DroneError`, `RoleKind` |
//! | [`settings`] | `DroneSettings`, `FailoverPolicy` |

pub mod drone;
pub mod election;
pub mod fleet_stats;
pub mod mutex;
pub mod order_assigner;
pub mod settings;

pub use drone::{Drone, DroneError, RoleKind};
pub use election::{Candidate, ElectionManager, Promotions};
pub use fleet_stats::FleetStatsTracker;
pub use mutex::{DistributedMutex, LockStatus};
pub use order_assigner::OrderAssigner;
pub use settings::{DroneSettings, FailoverPolicy};
