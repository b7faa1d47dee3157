// SPDX-License-Identifier: AGPL-3.0
//! # In-Process Transport
//!
//! Routes peer RPCs between drones living in the same process. Each inbound
//! request runs in its own tokio task, the same way a network server would
//! hand every connection to a fresh task, so a handler that parks (a lock
//! request) never blocks other traffic.
//!
//! Links can be broken to exercise failure handling:
//!
//! - [`LocalNetwork::partition`] cuts a drone off: every call to or from it is
//!   refused straight away.
//! - [`LocalNetwork::freeze`] makes calls to a drone hang forever, so only a
//!   caller-side deadline notices.

use crate::domain::middleware::{
    AssignOutcome, JoinResponse, PeerClient, PeerError, PeerResult, PeerServer,
};
use async_trait::async_trait;
use dronering_core::domain::drone::{DroneId, DroneIdentifier};
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::order::Order;
use dronering_core::domain::reports::CompletedDelivery;
use dronering_core::domain::status::DroneStatus;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct Links {
    servers: HashMap<DroneId, Weak<dyn PeerServer>>,
    partitioned: HashSet<DroneId>,
    frozen: HashSet<DroneId>,
}

enum Route {
    Deliver(Arc<dyn PeerServer>),
    Hang,
}

#[derive(Default)]
pub struct LocalNetwork {
    links: RwLock<Links>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `server` reachable as `drone`. Rebinding replaces the old server.
    pub fn bind(&self, drone: &DroneIdentifier, server: Weak<dyn PeerServer>) {
        debug!(%drone, "binding drone to local network");
        self.links.write().servers.insert(drone.id(), server);
    }

    pub fn unbind(&self, drone: &DroneIdentifier) {
        debug!(%drone, "unbinding drone from local network");
        self.links.write().servers.remove(&drone.id());
    }

    pub fn partition(&self, drone: &DroneIdentifier) {
        self.links.write().partitioned.insert(drone.id());
    }

    pub fn freeze(&self, drone: &DroneIdentifier) {
        self.links.write().frozen.insert(drone.id());
    }

    /// Undo [`Self::partition`] and [`Self::freeze`].
    pub fn heal(&self, drone: &DroneIdentifier) {
        let mut links = self.links.write();
        links.partitioned.remove(&drone.id());
        links.frozen.remove(&drone.id());
    }

    /// A client that sends on behalf of `sender`.
    pub fn client_for(self: &Arc<Self>, sender: &DroneIdentifier) -> LocalClient {
        LocalClient {
            network: Arc::clone(self),
            sender: sender.clone(),
        }
    }

    fn route(&self, from: &DroneIdentifier, to: &DroneIdentifier) -> PeerResult<Route> {
        let links = self.links.read();
        if links.partitioned.contains(&from.id()) || links.partitioned.contains(&to.id()) {
            return Err(PeerError::unreachable(to, "connection refused"));
        }
        if links.frozen.contains(&to.id()) {
            return Ok(Route::Hang);
        }
        links
            .servers
            .get(&to.id())
            .and_then(Weak::upgrade)
            .map(Route::Deliver)
            .ok_or_else(|| PeerError::unreachable(to, "no drone listening at this address"))
    }
}

/// [`PeerClient`] over a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalClient {
    network: Arc<LocalNetwork>,
    sender: DroneIdentifier,
}

impl LocalClient {
    async fn dispatch<T, F, Fut>(&self, to: &DroneIdentifier, call: F) -> PeerResult<T>
    where
        F: FnOnce(Arc<dyn PeerServer>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let server = match self.network.route(&self.sender, to)? {
            Route::Deliver(server) => server,
            Route::Hang => return futures::future::pending().await,
        };
        tokio::spawn(call(server))
            .await
            .map_err(|e| PeerError::unreachable(to, format!("request handler failed: {e}")))
    }
}

#[async_trait]
impl PeerClient for LocalClient {
    async fn join_ring(
        &self,
        to: &DroneIdentifier,
        sender: &DroneIdentifier,
        starting_position: CityPoint,
    ) -> PeerResult<JoinResponse> {
        let sender = sender.clone();
        self.dispatch(to, move |server| async move {
            server.on_join_ring(sender, starting_position).await
        })
        .await
    }

    async fn assign_order(&self, to: &DroneIdentifier, order: &Order) -> PeerResult<AssignOutcome> {
        let order = order.clone();
        self.dispatch(to, move |server| async move { server.on_assign_order(order).await })
            .await
    }

    async fn notify_completed_delivery(
        &self,
        to: &DroneIdentifier,
        report: &CompletedDelivery,
    ) -> PeerResult<()> {
        let report = report.clone();
        self.dispatch(to, move |server| async move {
            server.on_completed_delivery(report).await
        })
        .await
    }

    async fn request_status(&self, to: &DroneIdentifier) -> PeerResult<DroneStatus> {
        self.dispatch(to, |server| async move { server.on_status_request().await })
            .await
    }

    async fn notify_election(
        &self,
        to: &DroneIdentifier,
        candidate: &DroneIdentifier,
        candidate_battery: u8,
    ) -> PeerResult<()> {
        let candidate = candidate.clone();
        self.dispatch(to, move |server| async move {
            server.on_election(candidate, candidate_battery).await
        })
        .await
    }

    async fn notify_elected(&self, to: &DroneIdentifier, new_master: &DroneIdentifier) -> PeerResult<()> {
        let new_master = new_master.clone();
        self.dispatch(to, move |server| async move { server.on_elected(new_master).await })
            .await
    }

    async fn request_heartbeat(&self, to: &DroneIdentifier) -> PeerResult<()> {
        self.dispatch(to, |server| async move { server.on_heartbeat().await })
            .await
    }

    async fn request_lock(
        &self,
        to: &DroneIdentifier,
        logical_clock: u64,
        requester: &DroneIdentifier,
    ) -> PeerResult<()> {
        let requester = requester.clone();
        self.dispatch(to, move |server| async move {
            server.on_lock_request(logical_clock, requester).await
        })
        .await
    }

    async fn notify_completed_charging(&self, to: &DroneIdentifier, sender: &DroneIdentifier) -> PeerResult<()> {
        let sender = sender.clone();
        self.dispatch(to, move |server| async move {
            server.on_completed_charging(sender).await
        })
        .await
    }
}
