// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Infrastructure Layer
//!
//! Concrete adapters for the domain contracts.
//!
//! | Module | Implements |
//! |--------|------------|
//! | [`local_network`] | `PeerClient` routing to in-process `PeerServer`s |
//! | [`deadline`] | `PeerClient` decorator bounding every call but lock requests |
//! | [`admin`] | `AdminService` backed by an in-memory table |
//! | [`order_source`] | `OrderSource` fed by hand or by a timer |
//! | [`pollution_sensor`] | Simulated PM10 sensor task |

pub mod admin;
pub mod deadline;
pub mod local_network;
pub mod order_source;
pub mod pollution_sensor;

pub use admin::InMemoryAdminService;
pub use deadline::DeadlineClient;
pub use local_network::{LocalClient, LocalNetwork};
pub use order_source::{ManualOrderSource, PeriodicOrderSource};
pub use pollution_sensor::spawn_simulated_sensor;
