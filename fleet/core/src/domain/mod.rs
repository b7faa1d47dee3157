// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects and the membership ring

pub mod drone;
pub mod events;
pub mod geo;
pub mod membership;
pub mod node_config;
pub mod order;
pub mod reports;
pub mod status;
