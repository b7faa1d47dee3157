// SPDX-License-Identifier: AGPL-3.0

//! `dronering run`: start a simulated fleet and keep it flying until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use crate::simulation::SimulatedFleet;
use dronering_core::domain::node_config::FleetConfigManifest;

#[derive(Args)]
pub struct RunCommand {
    /// Number of drones (default: spec.simulation.drones)
    #[arg(short = 'n', long)]
    pub drones: Option<u32>,
}

pub async fn execute(command: RunCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = FleetConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let count = command.drones.unwrap_or(config.spec.simulation.drones);

    let fleet = SimulatedFleet::launch(&config, count).await?;
    println!(
        "{} {} drones flying, press Ctrl-C to land them",
        "✓".green(),
        fleet.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting the fleet down");
    fleet.shutdown().await;
    println!("{}", "✓ Every drone has landed".green());

    Ok(())
}
