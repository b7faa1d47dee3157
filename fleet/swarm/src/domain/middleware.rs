// SPDX-License-Identifier: AGPL-3.0
//! # Peer Communication Contract
//!
//! Every drone exposes the same nine request/response operations to its
//! peers. [`PeerClient`] is the calling side, [`PeerServer`] the receiving
//! side; the transport in between is pluggable (see
//! `infrastructure::local_network` for the in-process one).
//!
//! A failed call always surfaces as a [`PeerError`], never as a silent hang:
//! every operation except [`PeerClient::request_lock`] must be bounded by a
//! deadline (see `infrastructure::deadline::DeadlineClient`). Lock requests
//! are the exception because a peer legitimately delays its answer for as
//! long as it occupies the charging bay.

use async_trait::async_trait;
use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::order::Order;
use dronering_core::domain::reports::CompletedDelivery;
use dronering_core::domain::status::DroneStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a call to a peer did not produce an answer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("peer {peer} is unreachable: {reason}")]
    Unreachable {
        peer: DroneIdentifier,
        reason: String,
    },

    #[error("peer {peer} did not answer within {deadline:?}")]
    DeadlineExceeded {
        peer: DroneIdentifier,
        deadline: Duration,
    },
}

impl PeerError {
    pub fn unreachable(peer: &DroneIdentifier, reason: impl Into<String>) -> Self {
        PeerError::Unreachable {
            peer: peer.clone(),
            reason: reason.into(),
        }
    }

    /// The peer the failed call was addressed to.
    pub fn peer(&self) -> &DroneIdentifier {
        match self {
            PeerError::Unreachable { peer, .. } | PeerError::DeadlineExceeded { peer, .. } => peer,
        }
    }
}

pub type PeerResult<T> = Result<T, PeerError>;

/// Answer to a ring join announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub responder: DroneIdentifier,
    pub is_master: bool,
}

/// Answer to an order assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOutcome {
    Accepted,
    /// The drone is delivering, charging or shutting down.
    Refused,
}

/// Outbound side of the peer RPC surface.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn join_ring(
        &self,
        to: &DroneIdentifier,
        sender: &DroneIdentifier,
        starting_position: CityPoint,
    ) -> PeerResult<JoinResponse>;

    async fn assign_order(&self, to: &DroneIdentifier, order: &Order) -> PeerResult<AssignOutcome>;

    async fn notify_completed_delivery(
        &self,
        to: &DroneIdentifier,
        report: &CompletedDelivery,
    ) -> PeerResult<()>;

    async fn request_status(&self, to: &DroneIdentifier) -> PeerResult<DroneStatus>;

    async fn notify_election(
        &self,
        to: &DroneIdentifier,
        candidate: &DroneIdentifier,
        candidate_battery: u8,
    ) -> PeerResult<()>;

    async fn notify_elected(&self, to: &DroneIdentifier, new_master: &DroneIdentifier) -> PeerResult<()>;

    async fn request_heartbeat(&self, to: &DroneIdentifier) -> PeerResult<()>;

    /// Completes once `to` grants the lock. Must not be subject to a deadline.
    async fn request_lock(
        &self,
        to: &DroneIdentifier,
        logical_clock: u64,
        requester: &DroneIdentifier,
    ) -> PeerResult<()>;

    async fn notify_completed_charging(&self, to: &DroneIdentifier, sender: &DroneIdentifier) -> PeerResult<()>;
}

/// Inbound side of the peer RPC surface, implemented by the drone.
///
/// Handlers never fail: whatever goes wrong while handling a request is dealt
/// with locally, the caller only learns about transport failures.
#[async_trait]
pub trait PeerServer: Send + Sync {
    async fn on_join_ring(&self, sender: DroneIdentifier, starting_position: CityPoint) -> JoinResponse;

    async fn on_assign_order(&self, order: Order) -> AssignOutcome;

    async fn on_completed_delivery(&self, report: CompletedDelivery);

    async fn on_status_request(&self) -> DroneStatus;

    async fn on_election(&self, candidate: DroneIdentifier, candidate_battery: u8);

    async fn on_elected(&self, new_master: DroneIdentifier);

    async fn on_heartbeat(&self);

    /// May park for as long as this drone holds, or has priority for, the
    /// charging bay.
    async fn on_lock_request(&self, logical_clock: u64, requester: DroneIdentifier);

    async fn on_completed_charging(&self, sender: DroneIdentifier);
}
