// SPDX-License-Identifier: AGPL-3.0

use crate::domain::pollution::PollutionTracker;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Simulated PM10 sensor: feeds a random reading into `tracker` every
/// `interval` until `cancel` fires.
pub fn spawn_simulated_sensor(
    tracker: Arc<PollutionTracker>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reading = rand::rng().random_range(5.0..95.0);
                    tracker.record(reading);
                }
            }
        }
    })
}
