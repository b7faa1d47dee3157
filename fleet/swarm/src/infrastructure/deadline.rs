// SPDX-License-Identifier: AGPL-3.0

use crate::domain::middleware::{AssignOutcome, JoinResponse, PeerClient, PeerError, PeerResult};
use async_trait::async_trait;
use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::order::Order;
use dronering_core::domain::reports::CompletedDelivery;
use dronering_core::domain::status::DroneStatus;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Applies a bounded deadline to every call except `request_lock`, turning a
/// crashed or partitioned peer into a [`PeerError::DeadlineExceeded`] instead
/// of a hang.
pub struct DeadlineClient {
    inner: Arc<dyn PeerClient>,
    deadline: Duration,
}

impl DeadlineClient {
    pub fn new(inner: Arc<dyn PeerClient>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        to: &DroneIdentifier,
        call: impl Future<Output = PeerResult<T>>,
    ) -> PeerResult<T> {
        match tokio::time::timeout(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::DeadlineExceeded {
                peer: to.clone(),
                deadline: self.deadline,
            }),
        }
    }
}

#[async_trait]
impl PeerClient for DeadlineClient {
    async fn join_ring(
        &self,
        to: &DroneIdentifier,
        sender: &DroneIdentifier,
        starting_position: CityPoint,
    ) -> PeerResult<JoinResponse> {
        self.bounded(to, self.inner.join_ring(to, sender, starting_position))
            .await
    }

    async fn assign_order(&self, to: &DroneIdentifier, order: &Order) -> PeerResult<AssignOutcome> {
        self.bounded(to, self.inner.assign_order(to, order)).await
    }

    async fn notify_completed_delivery(
        &self,
        to: &DroneIdentifier,
        report: &CompletedDelivery,
    ) -> PeerResult<()> {
        self.bounded(to, self.inner.notify_completed_delivery(to, report))
            .await
    }

    async fn request_status(&self, to: &DroneIdentifier) -> PeerResult<DroneStatus> {
        self.bounded(to, self.inner.request_status(to)).await
    }

    async fn notify_election(
        &self,
        to: &DroneIdentifier,
        candidate: &DroneIdentifier,
        candidate_battery: u8,
    ) -> PeerResult<()> {
        self.bounded(to, self.inner.notify_election(to, candidate, candidate_battery))
            .await
    }

    async fn notify_elected(&self, to: &DroneIdentifier, new_master: &DroneIdentifier) -> PeerResult<()> {
        self.bounded(to, self.inner.notify_elected(to, new_master))
            .await
    }

    async fn request_heartbeat(&self, to: &DroneIdentifier) -> PeerResult<()> {
        self.bounded(to, self.inner.request_heartbeat(to)).await
    }

    async fn request_lock(
        &self,
        to: &DroneIdentifier,
        logical_clock: u64,
        requester: &DroneIdentifier,
    ) -> PeerResult<()> {
        // a grant may legitimately take a whole charging session
        self.inner.request_lock(to, logical_clock, requester).await
    }

    async fn notify_completed_charging(&self, to: &DroneIdentifier, sender: &DroneIdentifier) -> PeerResult<()> {
        self.bounded(to, self.inner.notify_completed_charging(to, sender))
            .await
    }
}
