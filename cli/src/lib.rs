// SPDX-License-Identifier: AGPL-3.0
//! dronering CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers and the in-process fleet they drive

pub mod commands;
pub mod simulation;
