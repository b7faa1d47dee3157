// SPDX-License-Identifier: AGPL-3.0
//! # Drone
//!
//! One fleet member. Composes the membership store, the charging mutex, the
//! election manager and (once master) the order assigner and statistics
//! tracker, and answers peer RPCs through [`PeerServer`].
//!
//! ## Roles
//!
//! ```text
//! Startup ──registered alone──────────▶ Master
//!    │                                    ▲
//!    └──registered with peers──▶ Slave ───┘ (won an election)
//! ```
//!
//! A master never steps down; it only shuts down.
//!
//! ## Reports to the master
//!
//! Completed deliveries, heartbeats and finished charging sessions all go
//! through [`Drone::deliver_to_master`]: find (or elect) the master, send,
//! and on failure drop the master, elect again and retry with exponential
//! backoff until the failover policy gives up.
//!
//! ## Wiring
//!
//! The caller binds the drone to its transport before calling
//! [`Drone::start`], because peers may call back while it is joining.

use crate::application::election::{Candidate, ElectionManager, Promotions};
use crate::application::fleet_stats::FleetStatsTracker;
use crate::application::mutex::DistributedMutex;
use crate::application::order_assigner::OrderAssigner;
use crate::application::settings::DroneSettings;
use crate::domain::admin::{AdminError, AdminService};
use crate::domain::middleware::{AssignOutcome, JoinResponse, PeerClient, PeerResult, PeerServer};
use crate::domain::order_source::OrderSource;
use crate::domain::pollution::PollutionTracker;
use crate::infrastructure::pollution_sensor::spawn_simulated_sensor;
use async_trait::async_trait;
use chrono::Utc;
use dronering_core::domain::drone::{DroneId, DroneIdentifier};
use dronering_core::domain::events::FleetEvent;
use dronering_core::domain::geo::CityPoint;
use dronering_core::domain::membership::MembershipStore;
use dronering_core::domain::order::Order;
use dronering_core::domain::reports::CompletedDelivery;
use dronering_core::domain::status::DroneStatus;
use dronering_core::infrastructure::event_bus::EventBus;
use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DroneError {
    #[error("drone id {0} is already registered, pick another id")]
    DuplicateIdentity(DroneId),

    #[error("admin service error: {0}")]
    Admin(#[from] AdminError),

    #[error("no master could be reached after {attempts} attempts")]
    FailoverExhausted { attempts: u32 },

    #[error("drone has not joined the fleet yet")]
    NotRegistered,
}

/// The observable role of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Startup,
    Slave,
    Master,
}

struct SlaveRuntime {
    heartbeat: JoinHandle<()>,
}

#[derive(Clone)]
struct MasterRuntime {
    assigner: Arc<OrderAssigner>,
    stats: Arc<FleetStatsTracker>,
    /// Stops the order intake and the stats reporter.
    cancel: CancellationToken,
}

enum Role {
    Startup,
    Slave(SlaveRuntime),
    Master(MasterRuntime),
}

impl Role {
    fn kind(&self) -> RoleKind {
        match self {
            Role::Startup => RoleKind::Startup,
            Role::Slave(_) => RoleKind::Slave,
            Role::Master(_) => RoleKind::Master,
        }
    }
}

pub struct Drone {
    me: DroneIdentifier,
    this: Weak<Drone>,
    settings: DroneSettings,
    store: Arc<MembershipStore>,
    client: Arc<dyn PeerClient>,
    admin: Arc<dyn AdminService>,
    orders: Arc<dyn OrderSource>,
    events: EventBus,
    status: watch::Sender<DroneStatus>,
    /// Accepted orders whose completion report has not finished yet.
    in_flight: watch::Sender<usize>,
    charging: watch::Sender<bool>,
    mutex: DistributedMutex,
    election: Arc<ElectionManager>,
    promotions: Mutex<Option<Promotions>>,
    pollution: Arc<PollutionTracker>,
    sensor: CancellationToken,
    role: Mutex<Role>,
    shutting_down: AtomicBool,
    terminated: watch::Sender<bool>,
}

impl Drone {
    pub fn new(
        me: DroneIdentifier,
        settings: DroneSettings,
        client: Arc<dyn PeerClient>,
        admin: Arc<dyn AdminService>,
        orders: Arc<dyn OrderSource>,
        events: EventBus,
    ) -> Arc<Self> {
        let store = Arc::new(MembershipStore::new());
        let (status, status_rx) = watch::channel(DroneStatus::new(CityPoint::CHARGING_BAY));
        let (election, promotions) = ElectionManager::new(
            me.clone(),
            Arc::clone(&store),
            Arc::clone(&client),
            status_rx,
            events.clone(),
            settings.election_timeout,
        );
        let mutex = DistributedMutex::new(me.clone(), Arc::clone(&store), Arc::clone(&client));
        let pollution = Arc::new(PollutionTracker::new(
            settings.pollution_window_size,
            settings.pollution_window_overlap,
        ));

        Arc::new_cyclic(|this| Self {
            me,
            this: this.clone(),
            settings,
            store,
            client,
            admin,
            orders,
            events,
            status,
            in_flight: watch::channel(0).0,
            charging: watch::channel(false).0,
            mutex,
            election,
            promotions: Mutex::new(Some(promotions)),
            pollution,
            sensor: CancellationToken::new(),
            role: Mutex::new(Role::Startup),
            shutting_down: AtomicBool::new(false),
            terminated: watch::channel(false).0,
        })
    }

    pub fn identifier(&self) -> &DroneIdentifier {
        &self.me
    }

    pub fn status(&self) -> DroneStatus {
        self.status.borrow().clone()
    }

    pub fn role(&self) -> RoleKind {
        self.role.lock().kind()
    }

    pub fn is_master(&self) -> bool {
        self.role() == RoleKind::Master
    }

    /// This drone's view of the fleet.
    pub fn store(&self) -> &Arc<MembershipStore> {
        &self.store
    }

    /// Resolves once [`Self::shutdown`] has finished.
    pub async fn terminated(&self) {
        let mut terminated = self.terminated.subscribe();
        let _ = terminated.wait_for(|done| *done).await;
    }

    /// Register with the admin service and take a role in the ring.
    pub async fn start(self: &Arc<Self>) -> Result<(), DroneError> {
        let registration = self
            .admin
            .register_drone(&self.me)
            .await
            .map_err(|e| match e {
                AdminError::Conflict(id) => DroneError::DuplicateIdentity(id),
                other => DroneError::Admin(other),
            })?;

        let position = registration.start_position;
        self.status.send_replace(DroneStatus::new(position));
        for member in registration.members {
            self.store.add_peer(member);
        }
        self.store.update_status(&self.me, self.status());
        info!(drone = %self.me, %position, fleet_size = self.store.len(), "Drone registered");
        self.events.publish(FleetEvent::Registered {
            drone: self.me.clone(),
            fleet_size: self.store.len(),
            at: Utc::now(),
        });

        if let Some(promotions) = self.promotions.lock().take() {
            self.spawn_promotion_listener(promotions);
        }
        spawn_simulated_sensor(
            Arc::clone(&self.pollution),
            self.settings.pollution_sample_interval,
            self.sensor.clone(),
        );

        if self.store.peers_except(&self.me).is_empty() {
            info!("First drone of the fleet");
            self.promote().await;
            return Ok(());
        }

        self.announce_join(position).await;
        self.become_slave();
        Ok(())
    }

    /// Tell every known peer that this drone joined. Failures are handled
    /// per peer.
    async fn announce_join(&self, position: CityPoint) {
        let peers = self.store.peers_except(&self.me);
        let announcements = peers.into_iter().map(|peer| async move {
            match self.client.join_ring(&peer, &self.me, position).await {
                Ok(response) if response.is_master => {
                    debug!(master = %response.responder, "found the master");
                    self.store.set_master(response.responder);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%peer, error = %e, "Join announcement failed");
                    self.peer_unreachable(&peer);
                }
            }
        });
        join_all(announcements).await;

        info!(master = ?self.store.master().map(|m| m.id()), "Joined the ring");
        self.events.publish(FleetEvent::JoinedRing {
            drone: self.me.clone(),
            known_master: self.store.master(),
            at: Utc::now(),
        });
    }

    fn become_slave(&self) {
        let mut role = self.role.lock();
        // an election may have promoted us while the join was announced
        if matches!(*role, Role::Startup) {
            *role = Role::Slave(SlaveRuntime {
                heartbeat: self.spawn_heartbeat(),
            });
        }
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let this = self.this.clone();
        let interval = self.settings.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(drone) = this.upgrade() else {
                    break;
                };
                let sent = drone
                    .deliver_to_master("heartbeat", |client, master| async move {
                        client.request_heartbeat(&master).await
                    })
                    .await;
                if let Err(e) = sent {
                    warn!(error = %e, "Heartbeat dropped");
                }
            }
        })
    }

    fn spawn_promotion_listener(&self, mut promotions: Promotions) {
        let this = self.this.clone();
        tokio::spawn(async move {
            while promotions.recv().await.is_some() {
                let Some(drone) = this.upgrade() else {
                    break;
                };
                drone.promote().await;
            }
        });
    }

    fn master_runtime(&self) -> Option<MasterRuntime> {
        match &*self.role.lock() {
            Role::Master(runtime) => Some(runtime.clone()),
            _ => None,
        }
    }

    /// Take over the master duties. Runs at most once.
    async fn promote(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("Won an election while shutting down, not taking over");
            return;
        }
        let runtime = MasterRuntime {
            assigner: OrderAssigner::new(
                Arc::clone(&self.store),
                Arc::clone(&self.client),
                self.settings.low_battery_threshold,
            ),
            stats: Arc::new(FleetStatsTracker::new(Arc::clone(&self.store))),
            cancel: CancellationToken::new(),
        };
        let previous = {
            let mut role = self.role.lock();
            if matches!(*role, Role::Master(_)) {
                return;
            }
            std::mem::replace(&mut *role, Role::Master(runtime.clone()))
        };
        if let Role::Slave(slave) = previous {
            slave.heartbeat.abort();
        }

        self.store.set_master(self.me.clone());
        info!(drone = %self.me, "Became master");
        self.events.publish(FleetEvent::BecameMaster {
            drone: self.me.clone(),
            at: Utc::now(),
        });

        // statuses gathered as a slave may predate in-flight assignments
        self.refresh_peer_statuses().await;
        self.store.update_status(&self.me, self.status());

        self.spawn_stats_reporter(&runtime);
        self.start_order_intake(&runtime).await;
        runtime.assigner.notify();
    }

    async fn refresh_peer_statuses(&self) {
        let peers = self.store.peers_except(&self.me);
        let requests = peers.into_iter().map(|peer| async move {
            match self.client.request_status(&peer).await {
                Ok(status) => self.store.update_status(&peer, status),
                Err(e) => {
                    warn!(%peer, error = %e, "Status request failed");
                    self.peer_unreachable(&peer);
                }
            }
        });
        join_all(requests).await;
    }

    async fn start_order_intake(&self, runtime: &MasterRuntime) {
        let (sink, mut incoming) = mpsc::unbounded_channel::<Order>();
        let assigner = Arc::clone(&runtime.assigner);
        let cancel = runtime.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    order = incoming.recv() => match order {
                        Some(order) => assigner.enqueue(order),
                        None => break,
                    },
                }
            }
        });
        if let Err(e) = self.orders.start(sink).await {
            error!(error = %e, "Order source failed to start");
        }
    }

    fn spawn_stats_reporter(&self, runtime: &MasterRuntime) {
        let this = self.this.clone();
        let stats = Arc::clone(&runtime.stats);
        let cancel = runtime.cancel.clone();
        let interval = self.settings.stats_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(drone) = this.upgrade() else {
                            break;
                        };
                        drone.report_stats(&stats).await;
                    }
                }
            }
        });
    }

    async fn report_stats(&self, tracker: &FleetStatsTracker) {
        let stats = tracker.take_report();
        debug!(%stats, "reporting fleet statistics");
        if let Err(e) = self.admin.report_fleet_stats(stats.clone()).await {
            warn!(error = %e, "Fleet statistics could not be reported");
        }
        self.events.publish(FleetEvent::StatsReported {
            master: self.me.clone(),
            stats,
        });
    }

    fn peer_unreachable(&self, peer: &DroneIdentifier) {
        if self.store.signal_unreachable(peer) {
            self.events.publish(FleetEvent::PeerUnreachable {
                observer: self.me.clone(),
                peer: peer.clone(),
                at: Utc::now(),
            });
        }
    }

    /// Send something to whoever is master, electing a new one whenever the
    /// current one does not answer.
    async fn deliver_to_master<T, F, Fut>(&self, what: &str, send: F) -> Result<T, DroneError>
    where
        F: Fn(Arc<dyn PeerClient>, DroneIdentifier) -> Fut + Send + Sync,
        Fut: Future<Output = PeerResult<T>> + Send,
        T: Send,
    {
        let policy = &self.settings.failover;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let master = self.election.ensure_master().await;
            let e = match send(Arc::clone(&self.client), master.clone()).await {
                Ok(answer) => return Ok(answer),
                Err(e) => e,
            };

            warn!(%master, attempt, error = %e, "{what} did not reach the master");
            if !master.same_drone(&self.me) {
                self.peer_unreachable(&master);
            }
            if policy.exhausted(attempt) {
                return Err(DroneError::FailoverExhausted { attempts: attempt });
            }
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    /// Fly the order, then report it to the master.
    async fn deliver(self: Arc<Self>, order: Order) {
        tokio::time::sleep(self.settings.delivery_duration).await;

        let before = self.status();
        let distance = order.travel_distance_from(&before.position);
        // cleared before reporting: the master may assign the next order
        // as soon as it has the report
        let delivered = before.complete_delivery(self.settings.delivery_cost);
        self.status.send_replace(delivered.clone());

        let report = CompletedDelivery {
            timestamp: Utc::now(),
            sender: self.me.clone(),
            order: order.clone(),
            distance_travelled: distance,
            pollution_samples: self.pollution.drain(),
            battery_percent: delivered.battery_percent,
        };
        info!(order = %order.id, distance, battery = delivered.battery_percent, "Delivery completed");
        let reported = self
            .deliver_to_master("delivery report", |client, master| {
                let report = report.clone();
                async move { client.notify_completed_delivery(&master, &report).await }
            })
            .await;
        if let Err(e) = reported {
            warn!(order = %order.id, error = %e, "Delivery report dropped");
        }

        self.events.publish(FleetEvent::DeliveryCompleted {
            drone: self.me.clone(),
            order: order.id,
            battery_percent: delivered.battery_percent,
            at: Utc::now(),
        });
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));

        if delivered.is_low_battery(self.settings.low_battery_threshold) {
            info!(battery = delivered.battery_percent, "Battery low, shutting down");
            tokio::spawn(async move { self.shutdown().await });
        }
    }

    async fn wait_for_no_delivery(&self) {
        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    async fn wait_for_no_charging(&self) {
        let mut charging = self.charging.subscribe();
        let _ = charging.wait_for(|c| !*c).await;
    }

    /// Occupy the charging bay for one charging session, then tell the
    /// master. Orders are refused from the moment this is called.
    pub async fn recharge(&self) -> Result<(), DroneError> {
        if self.role() == RoleKind::Startup {
            return Err(DroneError::NotRegistered);
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("Recharge requested during shutdown, ignoring");
            return Ok(());
        }
        if self.charging.send_replace(true) {
            debug!("recharge already in progress");
            return Ok(());
        }
        self.status.send_modify(|s| *s = s.refusing_orders());

        self.mutex.take().await;
        self.wait_for_no_delivery().await;
        info!("Charging");
        self.events.publish(FleetEvent::ChargingStarted {
            drone: self.me.clone(),
            at: Utc::now(),
        });
        tokio::time::sleep(self.settings.charging_duration).await;
        self.status.send_modify(|s| *s = s.recharged());
        self.mutex.release();
        self.charging.send_replace(false);
        info!("Charging completed");
        self.events.publish(FleetEvent::ChargingCompleted {
            drone: self.me.clone(),
            at: Utc::now(),
        });

        let me = self.me.clone();
        self.deliver_to_master("charging report", |client, master| {
            let me = me.clone();
            async move { client.notify_completed_charging(&master, &me).await }
        })
        .await
    }

    /// Leave the fleet once in-flight work is done. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already requested");
            return;
        }
        info!(drone = %self.me, role = ?self.role(), "Shutting down");

        match self.master_runtime() {
            Some(runtime) => self.drain_master(&runtime).await,
            None => self.drain_slave().await,
        }

        if let Err(e) = self.admin.deregister_drone(&self.me).await {
            warn!(error = %e, "Deregistration failed");
        }
        self.sensor.cancel();
        self.terminated.send_replace(true);
        info!(drone = %self.me, "Shutdown completed");
        self.events.publish(FleetEvent::ShutdownCompleted {
            drone: self.me.clone(),
            at: Utc::now(),
        });
    }

    async fn drain_master(&self, runtime: &MasterRuntime) {
        self.orders.stop().await;
        let drained = tokio::time::timeout(
            self.settings.shutdown_drain_timeout,
            runtime.assigner.wait_until_drained(),
        )
        .await;
        if drained.is_err() {
            warn!(
                outstanding = runtime.assigner.outstanding(),
                timeout = ?self.settings.shutdown_drain_timeout,
                "Order queue not drained in time, leaving anyway"
            );
        }
        self.wait_for_no_delivery().await;
        self.wait_for_no_charging().await;

        self.report_stats(&runtime.stats).await;
        runtime.cancel.cancel();
    }

    async fn drain_slave(&self) {
        self.wait_for_no_delivery().await;
        self.wait_for_no_charging().await;
        self.election.wait_until_idle().await;
        if let Role::Slave(slave) = &*self.role.lock() {
            slave.heartbeat.abort();
        }
    }
}

#[async_trait]
impl PeerServer for Drone {
    async fn on_join_ring(&self, sender: DroneIdentifier, starting_position: CityPoint) -> JoinResponse {
        info!(peer = %sender, position = %starting_position, "Peer joined the ring");
        self.store.add_peer(sender.clone());
        self.store
            .update_status(&sender, DroneStatus::new(starting_position));
        self.events.publish(FleetEvent::PeerJoined {
            observer: self.me.clone(),
            peer: sender,
            at: Utc::now(),
        });

        let master = self.master_runtime();
        if let Some(runtime) = &master {
            runtime.assigner.notify();
        }
        JoinResponse {
            responder: self.me.clone(),
            is_master: master.is_some(),
        }
    }

    async fn on_assign_order(&self, order: Order) -> AssignOutcome {
        let busy = self.shutting_down.load(Ordering::SeqCst) || *self.charging.borrow();
        let accepted = !busy
            && self.status.send_if_modified(|status| {
                if status.is_delivering() {
                    return false;
                }
                *status = status.assign(order.clone());
                true
            });

        if !accepted {
            debug!(order = %order.id, "refusing order");
            self.events.publish(FleetEvent::OrderRefused {
                drone: self.me.clone(),
                order: order.id,
                at: Utc::now(),
            });
            return AssignOutcome::Refused;
        }

        info!(%order, "Order accepted");
        self.in_flight.send_modify(|n| *n += 1);
        self.events.publish(FleetEvent::OrderAccepted {
            drone: self.me.clone(),
            order: order.id,
            at: Utc::now(),
        });
        match self.this.upgrade() {
            Some(drone) => {
                tokio::spawn(drone.deliver(order));
            }
            None => self.in_flight.send_modify(|n| *n = n.saturating_sub(1)),
        }
        AssignOutcome::Accepted
    }

    async fn on_completed_delivery(&self, report: CompletedDelivery) {
        debug!(sender = %report.sender, order = %report.order.id, "delivery report received");
        // a drone waiting to recharge stays flagged as refusing
        let accepting_orders = self
            .store
            .status(&report.sender)
            .map_or(true, |known| known.accepting_orders);
        self.store.update_status(
            &report.sender,
            DroneStatus {
                accepting_orders,
                ..DroneStatus::with_battery(report.order.delivery_point, report.battery_percent)
            },
        );
        let Some(runtime) = self.master_runtime() else {
            warn!(sender = %report.sender, "Delivery report received while not master");
            return;
        };
        metrics::counter!("dronering_deliveries_completed_total").increment(1);
        runtime.stats.record(&report);
        runtime.assigner.notify();
    }

    async fn on_status_request(&self) -> DroneStatus {
        self.status()
    }

    async fn on_election(&self, candidate: DroneIdentifier, candidate_battery: u8) {
        self.election.on_election(Candidate {
            drone: candidate,
            battery: candidate_battery,
        });
    }

    async fn on_elected(&self, new_master: DroneIdentifier) {
        self.election.on_elected(new_master);
    }

    async fn on_heartbeat(&self) {
        debug!("heartbeat");
    }

    async fn on_lock_request(&self, logical_clock: u64, requester: DroneIdentifier) {
        self.mutex.on_lock_request(logical_clock, &requester).await;
    }

    async fn on_completed_charging(&self, sender: DroneIdentifier) {
        debug!(%sender, "charging completed");
        self.store.mark_charging_completed(&sender);
        if let Some(runtime) = self.master_runtime() {
            runtime.assigner.notify();
        }
    }
}
