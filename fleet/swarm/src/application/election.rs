// SPDX-License-Identifier: AGPL-3.0
//! # Election Manager
//!
//! Chang–Roberts ring election with a battery-first candidate ordering: the
//! drone with the most battery leads, the higher id breaks ties.
//!
//! ## Round lifecycle
//!
//! ```text
//! idle ──begin / ELECTION──▶ participant ──own candidacy returns──▶ master
//!   ▲                                                                 │
//!   └──────────────── ELECTED travels the ring and comes back ◀──────┘
//! ```
//!
//! Several rounds may be in flight at once (two drones noticing the same dead
//! master). The winner counts the ELECTED messages it still has to see come
//! back and only closes its round once that count reaches zero.
//!
//! Every forward is retried against the next successor when a peer turns out
//! to be unreachable, and a message whose subject is the unreachable peer is
//! dropped. When the ring shrinks to this drone alone, the drone elects itself.

use crate::domain::middleware::PeerClient;
use chrono::Utc;
use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::events::FleetEvent;
use dronering_core::domain::membership::MembershipStore;
use dronering_core::domain::status::DroneStatus;
use dronering_core::infrastructure::event_bus::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// A drone running for master, with the battery it advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub drone: DroneIdentifier,
    pub battery: u8,
}

impl Candidate {
    pub fn is_preferred_over(&self, other: &Candidate) -> bool {
        (self.battery, self.drone.id()) > (other.battery, other.drone.id())
    }
}

#[derive(Debug, Clone)]
enum RingMessage {
    Election(Candidate),
    Elected(DroneIdentifier),
}

impl RingMessage {
    /// The drone the message is about.
    fn subject(&self) -> &DroneIdentifier {
        match self {
            RingMessage::Election(candidate) => &candidate.drone,
            RingMessage::Elected(master) => master,
        }
    }
}

#[derive(Default)]
struct RoundState {
    participant: bool,
    pending_elected_forwards: u32,
    waiters: Vec<oneshot::Sender<DroneIdentifier>>,
}

/// Tells the owning drone that it just won an election.
pub type Promotions = mpsc::UnboundedReceiver<()>;

pub struct ElectionManager {
    me: DroneIdentifier,
    store: Arc<MembershipStore>,
    client: Arc<dyn PeerClient>,
    status: watch::Receiver<DroneStatus>,
    events: EventBus,
    round_timeout: Duration,
    round: Mutex<RoundState>,
    running: watch::Sender<bool>,
    promotions: mpsc::UnboundedSender<()>,
}

impl ElectionManager {
    /// `status` is the owning drone's live status; its battery is what this
    /// drone advertises when running for master.
    pub fn new(
        me: DroneIdentifier,
        store: Arc<MembershipStore>,
        client: Arc<dyn PeerClient>,
        status: watch::Receiver<DroneStatus>,
        events: EventBus,
        round_timeout: Duration,
    ) -> (Arc<Self>, Promotions) {
        store.add_peer(me.clone());
        let (running, _) = watch::channel(false);
        let (promotions, promoted) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            me,
            store,
            client,
            status,
            events,
            round_timeout,
            round: Mutex::new(RoundState::default()),
            running,
            promotions,
        });
        (manager, promoted)
    }

    pub fn candidate(&self) -> Candidate {
        Candidate {
            drone: self.me.clone(),
            battery: self.status.borrow().battery_percent,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn is_participant(&self) -> bool {
        self.round.lock().participant
    }

    pub fn pending_elected_forwards(&self) -> u32 {
        self.round.lock().pending_elected_forwards
    }

    fn is_master(&self) -> bool {
        self.store.master().is_some_and(|m| m.same_drone(&self.me))
    }

    /// Opens a round and sends this drone's candidacy. Returns `false`
    /// without sending anything when a round is already running here.
    pub fn begin_election(self: &Arc<Self>) -> bool {
        let opened = self.running.send_if_modified(|running| !std::mem::replace(running, true));
        if !opened {
            debug!("Election already running, joining it");
            return false;
        }
        self.round.lock().participant = true;
        metrics::counter!("dronering_elections_started_total").increment(1);

        let candidate = self.candidate();
        info!(battery = candidate.battery, "Starting election");
        if self.store.next_in_ring(&self.me).same_drone(&self.me) {
            self.elect_alone();
            return true;
        }
        self.forward(RingMessage::Election(candidate));
        true
    }

    pub fn on_election(self: &Arc<Self>, candidate: Candidate) {
        if self.is_master() {
            debug!(candidate = %candidate.drone, "already master, answering with ELECTED");
            self.round.lock().pending_elected_forwards += 1;
            self.running.send_replace(true);
            self.forward(RingMessage::Elected(self.me.clone()));
            return;
        }

        if candidate.drone.same_drone(&self.me) {
            info!("Candidacy went around the ring, becoming master");
            self.store.set_master(self.me.clone());
            self.round.lock().pending_elected_forwards += 1;
            self.running.send_replace(true);
            let _ = self.promotions.send(());
            self.forward(RingMessage::Elected(self.me.clone()));
            return;
        }

        self.running.send_replace(true);
        let me = self.candidate();
        let forward = {
            let mut round = self.round.lock();
            if candidate.is_preferred_over(&me) {
                round.participant = true;
                Some(candidate.clone())
            } else if !round.participant {
                round.participant = true;
                Some(me)
            } else {
                None
            }
        };
        match forward {
            Some(best) => self.forward(RingMessage::Election(best)),
            None => debug!(candidate = %candidate.drone, "dropping weaker candidacy"),
        }
    }

    pub fn on_elected(self: &Arc<Self>, new_master: DroneIdentifier) {
        if new_master.same_drone(&self.me) {
            let closed = {
                let mut round = self.round.lock();
                round.pending_elected_forwards = round.pending_elected_forwards.saturating_sub(1);
                round.pending_elected_forwards == 0
            };
            if closed {
                debug!("ELECTED went around the ring, closing the round");
                self.close_round(self.me.clone());
            }
            return;
        }

        if self.is_master() {
            warn!(%new_master, "ELECTED for another drone while master, ignoring");
            return;
        }

        self.forward(RingMessage::Elected(new_master.clone()));

        let already_known = self
            .store
            .master()
            .is_some_and(|m| m.same_drone(&new_master));
        if already_known && !self.is_running() {
            return;
        }
        info!(%new_master, "New master elected");
        self.store.set_master(new_master.clone());
        self.close_round(new_master);
    }

    /// Resolves with the next master this drone learns about.
    pub fn wait_for_new_master(&self) -> oneshot::Receiver<DroneIdentifier> {
        let (tx, rx) = oneshot::channel();
        self.round.lock().waiters.push(tx);
        rx
    }

    pub async fn wait_until_idle(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|r| !*r).await;
    }

    /// The current master, electing one first if none is known. Joins an
    /// election that is already running instead of starting another; a round
    /// that produces no master within the round timeout is restarted.
    pub async fn ensure_master(self: &Arc<Self>) -> DroneIdentifier {
        loop {
            // register before checking so a round closing in between is not missed
            let elected = self.wait_for_new_master();
            if let Some(master) = self.store.master() {
                return master;
            }
            self.begin_election();
            match tokio::time::timeout(self.round_timeout, elected).await {
                Ok(Ok(master)) => return master,
                Ok(Err(_)) => continue,
                Err(_) => {
                    warn!(timeout = ?self.round_timeout, "Election produced no master, starting over");
                    self.round.lock().participant = false;
                    self.running.send_replace(false);
                }
            }
        }
    }

    fn elect_alone(&self) {
        info!("Alone in the ring, electing myself");
        self.store.set_master(self.me.clone());
        self.round.lock().pending_elected_forwards = 0;
        let _ = self.promotions.send(());
        self.close_round(self.me.clone());
    }

    fn close_round(&self, master: DroneIdentifier) {
        let waiters = {
            let mut round = self.round.lock();
            round.participant = false;
            std::mem::take(&mut round.waiters)
        };
        self.running.send_replace(false);
        for waiter in waiters {
            let _ = waiter.send(master.clone());
        }
        self.events.publish(FleetEvent::MasterElected {
            observer: self.me.clone(),
            master,
            at: Utc::now(),
        });
    }

    fn forward(self: &Arc<Self>, message: RingMessage) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.send_around_ring(message).await });
    }

    async fn send_around_ring(&self, message: RingMessage) {
        loop {
            let next = self.store.next_in_ring(&self.me);
            if next.same_drone(&self.me) {
                match &message {
                    RingMessage::Election(_) => self.elect_alone(),
                    RingMessage::Elected(master) if master.same_drone(&self.me) => self.elect_alone(),
                    RingMessage::Elected(_) => debug!("alone in the ring, ELECTED stops here"),
                }
                return;
            }

            let sent = match &message {
                RingMessage::Election(candidate) => {
                    self.client
                        .notify_election(&next, &candidate.drone, candidate.battery)
                        .await
                }
                RingMessage::Elected(master) => self.client.notify_elected(&next, master).await,
            };
            let Err(e) = sent else {
                return;
            };

            warn!(peer = %next, error = %e, "Ring forward failed, trying the next drone");
            self.store.signal_unreachable(&next);
            self.events.publish(FleetEvent::PeerUnreachable {
                observer: self.me.clone(),
                peer: next.clone(),
                at: Utc::now(),
            });
            if message.subject().same_drone(&next) {
                debug!(peer = %next, "message is about the unreachable drone, dropping it");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_network::LocalNetwork;
    use crate::testing::{drone, settle, Call, ScriptedClient, TestPeer};
    use dronering_core::domain::geo::CityPoint;
    use futures::future::join_all;

    struct Member {
        election: Arc<ElectionManager>,
        promotions: Promotions,
        _status: watch::Sender<DroneStatus>,
        _peer: Arc<TestPeer>,
    }

    fn ring(members: &[(u32, u8)]) -> (Arc<LocalNetwork>, Vec<Member>) {
        let network = LocalNetwork::new();
        let events = EventBus::new(100);
        let mut ring = Vec::new();
        for (id, battery) in members {
            let store = Arc::new(MembershipStore::with_peers(members.iter().map(|(i, _)| drone(*i))));
            let (status, status_rx) =
                watch::channel(DroneStatus::with_battery(CityPoint::CHARGING_BAY, *battery));
            let client: Arc<dyn PeerClient> = Arc::new(network.client_for(&drone(*id)));
            let (election, promotions) = ElectionManager::new(
                drone(*id),
                store,
                client,
                status_rx,
                events.clone(),
                Duration::from_secs(5),
            );
            let peer = TestPeer::bind_election(&network, &drone(*id), Arc::clone(&election));
            ring.push(Member {
                election,
                promotions,
                _status: status,
                _peer: peer,
            });
        }
        (network, ring)
    }

    fn alone(client: Arc<ScriptedClient>) -> (Arc<ElectionManager>, Promotions) {
        let store = Arc::new(MembershipStore::new());
        let (_status, status_rx) = watch::channel(DroneStatus::new(CityPoint::CHARGING_BAY));
        ElectionManager::new(
            drone(1),
            store,
            client,
            status_rx,
            EventBus::new(10),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_candidate_ordering() {
        let c = |id, battery| Candidate {
            drone: drone(id),
            battery,
        };
        assert!(c(1, 90).is_preferred_over(&c(7, 80)));
        assert!(c(7, 80).is_preferred_over(&c(1, 80)));
        assert!(!c(1, 80).is_preferred_over(&c(1, 80)));
    }

    #[tokio::test]
    async fn test_lone_drone_elects_itself_silently() {
        let client = Arc::new(ScriptedClient::new());
        let (election, mut promotions) = alone(Arc::clone(&client));

        assert!(election.begin_election());

        assert!(promotions.try_recv().is_ok());
        assert!(!election.is_running());
        assert!(!election.is_participant());
        assert_eq!(election.store.master(), Some(drone(1)));
        settle().await;
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_initiator_elects_best_battery_then_id() {
        let (_network, mut ring) = ring(&[(1, 50), (2, 80), (3, 80), (4, 20)]);

        let winner = tokio::time::timeout(Duration::from_secs(5), ring[0].election.ensure_master())
            .await
            .expect("election must terminate");
        assert_eq!(winner, drone(3));

        for member in ring.iter() {
            tokio::time::timeout(Duration::from_secs(5), member.election.wait_until_idle())
                .await
                .unwrap();
        }
        for member in ring.iter_mut() {
            let promoted = member.promotions.try_recv().is_ok();
            assert_eq!(promoted, member.election.me.id() == 3);
            assert_eq!(member.election.store.master(), Some(drone(3)));
        }
        assert_eq!(ring[2].election.pending_elected_forwards(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_initiators_agree_on_one_master() {
        let (_network, ring) = ring(&[(1, 60), (2, 60), (3, 95), (4, 10), (5, 60)]);

        let masters = tokio::time::timeout(
            Duration::from_secs(5),
            join_all(ring.iter().map(|m| m.election.ensure_master())),
        )
        .await
        .expect("every drone must learn the master");
        assert!(masters.iter().all(|m| *m == drone(3)));

        // stray weaker candidacies may still be travelling; wait for quiet
        tokio::time::timeout(Duration::from_secs(5), async {
            while ring.iter().any(|m| m.election.is_running())
                || ring[2].election.pending_elected_forwards() > 0
            {
                settle().await;
            }
        })
        .await
        .expect("every round must close");
        assert!(ring.iter().all(|m| m.election.store.master() == Some(drone(3))));
    }

    #[tokio::test]
    async fn test_unreachable_successor_is_skipped() {
        let (network, ring) = ring(&[(1, 100), (2, 100), (3, 100)]);
        network.partition(&drone(2));

        let winner = tokio::time::timeout(Duration::from_secs(5), ring[0].election.ensure_master())
            .await
            .unwrap();
        assert_eq!(winner, drone(3));
        assert!(!ring[0].election.store.contains(&drone(2)));
    }

    #[tokio::test]
    async fn test_ring_collapsing_to_self_elects_self() {
        let (network, mut ring) = ring(&[(1, 10), (2, 100)]);
        network.partition(&drone(2));

        let winner = tokio::time::timeout(Duration::from_secs(5), ring[0].election.ensure_master())
            .await
            .unwrap();
        assert_eq!(winner, drone(1));
        assert!(ring[0].promotions.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_elected_is_adopted_and_forwarded() {
        let client = Arc::new(ScriptedClient::new());
        let (election, _promotions) = alone(Arc::clone(&client));
        election.store.add_peer(drone(2));
        let learned = election.wait_for_new_master();

        election.on_elected(drone(2));

        assert_eq!(learned.await.unwrap(), drone(2));
        assert_eq!(election.store.master(), Some(drone(2)));
        settle().await;
        assert_eq!(
            client.calls(),
            vec![Call::Elected {
                to: 2,
                new_master: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_weaker_candidacy_is_dropped_by_participant() {
        let client = Arc::new(ScriptedClient::new());
        let (election, _promotions) = alone(Arc::clone(&client));
        election.store.add_peer(drone(2));

        // first weaker candidacy: not yet a participant, so run myself
        election.on_election(Candidate {
            drone: drone(2),
            battery: 10,
        });
        settle().await;
        // second weaker candidacy: already participant, dropped
        election.on_election(Candidate {
            drone: drone(2),
            battery: 10,
        });
        settle().await;

        assert_eq!(
            client.calls(),
            vec![Call::Election {
                to: 2,
                candidate: 1,
                battery: 100
            }]
        );
        assert!(election.is_participant());
        assert!(election.is_running());
    }

    #[tokio::test]
    async fn test_simultaneous_triggers_open_a_single_round() {
        let client = Arc::new(ScriptedClient::new());
        let (election, _promotions) = alone(Arc::clone(&client));
        election.store.add_peer(drone(2));

        let first = election.begin_election();
        let second = election.begin_election();
        settle().await;

        assert!(first);
        assert!(!second);
        assert_eq!(
            client.calls(),
            vec![Call::Election {
                to: 2,
                candidate: 1,
                battery: 100
            }]
        );
    }
}
