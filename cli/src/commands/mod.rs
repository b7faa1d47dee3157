// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the dronering CLI

pub mod config;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::run::RunCommand;
