// SPDX-License-Identifier: AGPL-3.0
//! # `dronering-swarm`: Ring Coordination Crate
//!
//! Everything a single drone needs to take part in the fleet: the peer RPC
//! contract, leader election around the ring, the Lamport-clock mutex guarding
//! the charging bay, the master's order assigner and the drone state machine
//! that composes them.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `PeerClient`/`PeerServer` contract, admin and order-source contracts, pollution window |
//! | [`application`] | Application | `DistributedMutex`, `ElectionManager`, `OrderAssigner`, `FleetStatsTracker`, `Drone` |
//! | [`infrastructure`] | Infrastructure | `LocalNetwork`, `DeadlineClient`, in-memory admin service, order sources, pollution sensor |
//!
//! ## Key Concepts
//!
//! - **Ring**: peers ordered by id; election messages travel to the successor.
//! - **Master**: the single drone that assigns orders and aggregates statistics.
//! - **Charging bay**: one physical resource, shared fleet-wide through the
//!   distributed mutex.
//!
//! All state is in memory. A restarted drone rebuilds its view of the fleet by
//! registering and joining the ring again.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod testing;

pub use application::*;
pub use domain::*;
