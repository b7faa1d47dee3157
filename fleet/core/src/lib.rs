// SPDX-License-Identifier: AGPL-3.0
//! dronering core
//!
//! Domain types shared by every fleet member: identities, grid geometry,
//! orders, status snapshots, reports, the membership ring and the fleet
//! configuration manifest.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Protocol-agnostic domain model; the coordination protocols
//!   live in `dronering-swarm`

pub mod domain;
pub mod infrastructure;

pub use domain::*;
