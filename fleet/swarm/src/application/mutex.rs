// SPDX-License-Identifier: AGPL-3.0
//! # Distributed Mutex
//!
//! Ricart–Agrawala mutual exclusion over Lamport clocks, guarding the single
//! charging bay of the fleet.
//!
//! There is no deny message. A peer that has priority over a request simply
//! delays its answer until it releases, so [`DistributedMutex::take`] returns
//! once every peer has answered (or turned out to be unreachable).
//!
//! Requests are totally ordered by `(timestamp, requester id)`.

use crate::domain::middleware::PeerClient;
use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::membership::MembershipStore;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Idle,
    Requesting,
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockState {
    status: LockStatus,
    /// Bumped on every release; deferred grants wait for it to move.
    releases: u64,
}

#[derive(Debug, Default)]
struct LamportClock {
    value: u64,
    my_request: u64,
}

pub struct DistributedMutex {
    me: DroneIdentifier,
    store: Arc<MembershipStore>,
    client: Arc<dyn PeerClient>,
    clock: Mutex<LamportClock>,
    state: watch::Sender<LockState>,
}

impl DistributedMutex {
    pub fn new(me: DroneIdentifier, store: Arc<MembershipStore>, client: Arc<dyn PeerClient>) -> Self {
        let (state, _) = watch::channel(LockState {
            status: LockStatus::Idle,
            releases: 0,
        });
        Self {
            me,
            store,
            client,
            clock: Mutex::new(LamportClock::default()),
            state,
        }
    }

    pub fn status(&self) -> LockStatus {
        self.state.borrow().status
    }

    pub fn logical_clock(&self) -> u64 {
        self.clock.lock().value
    }

    /// Acquire the charging bay. Waits for as long as other drones hold it or
    /// are ahead in the queue.
    ///
    /// # Panics
    ///
    /// When this drone is already requesting or holding the lock.
    pub async fn take(&self) {
        let timestamp = {
            let mut clock = self.clock.lock();
            assert_eq!(
                self.status(),
                LockStatus::Idle,
                "take() called while the charging lock is not idle"
            );
            clock.value += 1;
            clock.my_request = clock.value;
            self.state.send_modify(|s| s.status = LockStatus::Requesting);
            clock.value
        };

        let peers = self.store.peers_except(&self.me);
        debug!(timestamp, peers = peers.len(), "requesting charging lock");
        let requests = peers.into_iter().map(|peer| async move {
            if let Err(e) = self.client.request_lock(&peer, timestamp, &self.me).await {
                // an unreachable peer cannot be charging
                warn!(%peer, error = %e, "lock request failed, counting it as granted");
                self.store.signal_unreachable(&peer);
            }
        });
        join_all(requests).await;

        self.state.send_modify(|s| s.status = LockStatus::Held);
        info!(timestamp, "Charging lock acquired");
    }

    /// # Panics
    ///
    /// When the lock is not held.
    pub fn release(&self) {
        let _clock = self.clock.lock();
        assert_eq!(
            self.status(),
            LockStatus::Held,
            "release() called on a charging lock that is not held"
        );
        self.state.send_modify(|s| {
            s.status = LockStatus::Idle;
            s.releases += 1;
        });
        info!("Charging lock released");
    }

    /// Answer a peer's lock request, delaying the answer while this drone
    /// holds the lock or has an older pending request.
    pub async fn on_lock_request(&self, timestamp: u64, requester: &DroneIdentifier) {
        let deferred_until = {
            let mut clock = self.clock.lock();
            clock.value = clock.value.max(timestamp) + 1;
            let state = *self.state.borrow();
            let defer = match state.status {
                LockStatus::Idle => false,
                LockStatus::Held => true,
                LockStatus::Requesting => {
                    (clock.my_request, self.me.id()) < (timestamp, requester.id())
                }
            };
            defer.then_some(state.releases)
        };

        if let Some(releases) = deferred_until {
            debug!(%requester, timestamp, "deferring lock grant until release");
            let mut changes = self.state.subscribe();
            // the sender lives as long as self
            let _ = changes.wait_for(|s| s.releases > releases).await;
        }
        debug!(%requester, timestamp, "lock granted");
    }
}
