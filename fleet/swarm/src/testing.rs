// SPDX-License-Identifier: AGPL-3.0
//! Test doubles shared by the unit tests of this crate.

use crate::application::election::{Candidate, ElectionManager};
use crate::application::mutex::DistributedMutex;
use crate::domain::middleware::{
    AssignOutcome, JoinResponse, PeerClient, PeerError, PeerResult, PeerServer,
};
use crate::infrastructure::local_network::LocalNetwork;
use async_trait::async_trait;
use dronering_core::domain::drone::{DroneId, DroneIdentifier};
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::order::Order;
use dronering_core::domain::reports::CompletedDelivery;
use dronering_core::domain::status::DroneStatus;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub fn drone(id: DroneId) -> DroneIdentifier {
    DroneIdentifier::new(id, "localhost", 10_000 + id as u16)
}

/// Let spawned forwards and handlers run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// One recorded outbound call, reduced to the fields tests assert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    JoinRing { to: DroneId },
    AssignOrder { to: DroneId, order: u64 },
    CompletedDelivery { to: DroneId, order: u64 },
    RequestStatus { to: DroneId },
    Election { to: DroneId, candidate: DroneId, battery: u8 },
    Elected { to: DroneId, new_master: DroneId },
    Heartbeat { to: DroneId },
    Lock { to: DroneId, clock: u64 },
    CompletedCharging { to: DroneId },
}

/// Records every call and answers from a script: unreachable peers fail,
/// refusing peers refuse orders, everything else succeeds.
#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<Call>>,
    unreachable: Mutex<HashSet<DroneId>>,
    refusing: Mutex<HashSet<DroneId>>,
    statuses: Mutex<HashMap<DroneId, DroneStatus>>,
    master: Mutex<Option<DroneId>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// `(drone, order)` for every assignment attempted, in call order.
    pub fn assignments(&self) -> Vec<(DroneId, u64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::AssignOrder { to, order } => Some((*to, *order)),
                _ => None,
            })
            .collect()
    }

    pub fn mark_unreachable(&self, id: DroneId) {
        self.unreachable.lock().insert(id);
    }

    pub fn mark_reachable(&self, id: DroneId) {
        self.unreachable.lock().remove(&id);
    }

    pub fn refuse_orders(&self, id: DroneId) {
        self.refusing.lock().insert(id);
    }

    pub fn set_status(&self, id: DroneId, status: DroneStatus) {
        self.statuses.lock().insert(id, status);
    }

    /// The drone that answers join announcements as master.
    pub fn set_master(&self, id: DroneId) {
        *self.master.lock() = Some(id);
    }

    fn record(&self, to: &DroneIdentifier, call: Call) -> PeerResult<()> {
        self.calls.lock().push(call);
        if self.unreachable.lock().contains(&to.id()) {
            return Err(PeerError::unreachable(to, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for ScriptedClient {
    async fn join_ring(
        &self,
        to: &DroneIdentifier,
        _sender: &DroneIdentifier,
        _starting_position: CityPoint,
    ) -> PeerResult<JoinResponse> {
        self.record(to, Call::JoinRing { to: to.id() })?;
        Ok(JoinResponse {
            responder: to.clone(),
            is_master: *self.master.lock() == Some(to.id()),
        })
    }

    async fn assign_order(&self, to: &DroneIdentifier, order: &Order) -> PeerResult<AssignOutcome> {
        self.record(
            to,
            Call::AssignOrder {
                to: to.id(),
                order: order.id.0,
            },
        )?;
        if self.refusing.lock().contains(&to.id()) {
            Ok(AssignOutcome::Refused)
        } else {
            Ok(AssignOutcome::Accepted)
        }
    }

    async fn notify_completed_delivery(
        &self,
        to: &DroneIdentifier,
        report: &CompletedDelivery,
    ) -> PeerResult<()> {
        self.record(
            to,
            Call::CompletedDelivery {
                to: to.id(),
                order: report.order.id.0,
            },
        )
    }

    async fn request_status(&self, to: &DroneIdentifier) -> PeerResult<DroneStatus> {
        self.record(to, Call::RequestStatus { to: to.id() })?;
        self.statuses
            .lock()
            .get(&to.id())
            .cloned()
            .ok_or_else(|| PeerError::unreachable(to, "no scripted status"))
    }

    async fn notify_election(
        &self,
        to: &DroneIdentifier,
        candidate: &DroneIdentifier,
        candidate_battery: u8,
    ) -> PeerResult<()> {
        self.record(
            to,
            Call::Election {
                to: to.id(),
                candidate: candidate.id(),
                battery: candidate_battery,
            },
        )
    }

    async fn notify_elected(&self, to: &DroneIdentifier, new_master: &DroneIdentifier) -> PeerResult<()> {
        self.record(
            to,
            Call::Elected {
                to: to.id(),
                new_master: new_master.id(),
            },
        )
    }

    async fn request_heartbeat(&self, to: &DroneIdentifier) -> PeerResult<()> {
        self.record(to, Call::Heartbeat { to: to.id() })
    }

    async fn request_lock(
        &self,
        to: &DroneIdentifier,
        logical_clock: u64,
        _requester: &DroneIdentifier,
    ) -> PeerResult<()> {
        self.record(
            to,
            Call::Lock {
                to: to.id(),
                clock: logical_clock,
            },
        )
    }

    async fn notify_completed_charging(&self, to: &DroneIdentifier, _sender: &DroneIdentifier) -> PeerResult<()> {
        self.record(to, Call::CompletedCharging { to: to.id() })
    }
}

/// A peer bound to a [`LocalNetwork`] that hands election and lock traffic
/// to real components and answers everything else trivially.
pub struct TestPeer {
    me: DroneIdentifier,
    election: Option<Arc<ElectionManager>>,
    mutex: Option<Arc<DistributedMutex>>,
}

impl TestPeer {
    fn bind(network: &Arc<LocalNetwork>, peer: TestPeer) -> Arc<TestPeer> {
        let peer = Arc::new(peer);
        let server: Arc<dyn PeerServer> = peer.clone();
        network.bind(&peer.me, Arc::downgrade(&server));
        peer
    }

    pub fn bind_parked(network: &Arc<LocalNetwork>, me: &DroneIdentifier) -> Arc<TestPeer> {
        Self::bind(
            network,
            TestPeer {
                me: me.clone(),
                election: None,
                mutex: None,
            },
        )
    }

    pub fn bind_election(
        network: &Arc<LocalNetwork>,
        me: &DroneIdentifier,
        election: Arc<ElectionManager>,
    ) -> Arc<TestPeer> {
        Self::bind(
            network,
            TestPeer {
                me: me.clone(),
                election: Some(election),
                mutex: None,
            },
        )
    }

    pub fn bind_lock(
        network: &Arc<LocalNetwork>,
        me: &DroneIdentifier,
        mutex: Arc<DistributedMutex>,
    ) -> Arc<TestPeer> {
        Self::bind(
            network,
            TestPeer {
                me: me.clone(),
                election: None,
                mutex: Some(mutex),
            },
        )
    }
}

#[async_trait]
impl PeerServer for TestPeer {
    async fn on_join_ring(&self, _sender: DroneIdentifier, _starting_position: CityPoint) -> JoinResponse {
        JoinResponse {
            responder: self.me.clone(),
            is_master: false,
        }
    }

    async fn on_assign_order(&self, _order: Order) -> AssignOutcome {
        AssignOutcome::Accepted
    }

    async fn on_completed_delivery(&self, _report: CompletedDelivery) {}

    async fn on_status_request(&self) -> DroneStatus {
        DroneStatus::new(CityPoint::CHARGING_BAY)
    }

    async fn on_election(&self, candidate: DroneIdentifier, candidate_battery: u8) {
        if let Some(election) = &self.election {
            election.on_election(Candidate {
                drone: candidate,
                battery: candidate_battery,
            });
        }
    }

    async fn on_elected(&self, new_master: DroneIdentifier) {
        if let Some(election) = &self.election {
            election.on_elected(new_master);
        }
    }

    async fn on_heartbeat(&self) {}

    async fn on_lock_request(&self, logical_clock: u64, requester: DroneIdentifier) {
        if let Some(mutex) = &self.mutex {
            mutex.on_lock_request(logical_clock, &requester).await;
        }
    }

    async fn on_completed_charging(&self, _sender: DroneIdentifier) {}
}
