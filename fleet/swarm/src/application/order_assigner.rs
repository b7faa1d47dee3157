// SPDX-License-Identifier: AGPL-3.0
//! # Order Assigner
//!
//! Greedy matcher run by the master. Orders wait in a FIFO queue; every
//! trigger (new order, completed delivery, joined peer, finished charging)
//! schedules a matching pass. Passes are serialised, enqueueing never waits
//! for one.
//!
//! A pass snapshots the drones that can take an order right now, then hands
//! the oldest order to the drone closest to its start point (more battery,
//! then higher id, break ties). The resulting assignments are dispatched
//! concurrently:
//!
//! | Answer | Effect |
//! |--------|--------|
//! | accepted | the drone is recorded as delivering that order |
//! | refused | the drone is flagged as not accepting, the order is requeued |
//! | unreachable | the drone leaves the membership, the order is requeued |

use crate::domain::middleware::{AssignOutcome, PeerClient};
use dronering_core::domain::drone::DroneIdentifier;
use dronering_core::domain::membership::MembershipStore;
use dronering_core::domain::order::Order;
use dronering_core::domain::status::DroneStatus;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct OrderAssigner {
    store: Arc<MembershipStore>,
    client: Arc<dyn PeerClient>,
    low_battery_threshold: u8,
    queue: Mutex<VecDeque<Order>>,
    pass: tokio::sync::Mutex<()>,
    /// Orders queued or being dispatched.
    outstanding: watch::Sender<usize>,
}

impl OrderAssigner {
    pub fn new(
        store: Arc<MembershipStore>,
        client: Arc<dyn PeerClient>,
        low_battery_threshold: u8,
    ) -> Arc<Self> {
        let (outstanding, _) = watch::channel(0);
        Arc::new(Self {
            store,
            client,
            low_battery_threshold,
            queue: Mutex::new(VecDeque::new()),
            pass: tokio::sync::Mutex::new(()),
            outstanding,
        })
    }

    pub fn enqueue(self: &Arc<Self>, order: Order) {
        debug!(%order, "order queued");
        self.queue.lock().push_back(order);
        self.outstanding.send_modify(|n| *n += 1);
        self.notify();
    }

    /// Schedule a matching pass.
    pub fn notify(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_pass().await });
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Resolves once no order is queued or in flight. Resolves immediately
    /// when that is already the case.
    pub async fn wait_until_drained(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Run one matching pass now. Returns how many orders were handed out.
    pub async fn run_pass(self: &Arc<Self>) -> usize {
        let _pass = self.pass.lock().await;

        let mut available = self.store.available_for_deliveries(self.low_battery_threshold);
        let mut assignments = Vec::new();
        {
            let mut queue = self.queue.lock();
            while !available.is_empty() {
                let Some(order) = queue.pop_front() else {
                    break;
                };
                let Some(best) = closest_drone(&order, &available) else {
                    queue.push_front(order);
                    break;
                };
                let (drone, _) = available.swap_remove(best);
                assignments.push((order, drone));
            }
        }
        if assignments.is_empty() {
            return 0;
        }

        let outcomes = join_all(
            assignments
                .into_iter()
                .map(|(order, drone)| self.dispatch(order, drone)),
        )
        .await;
        let accepted = outcomes.iter().filter(|accepted| **accepted).count();
        if accepted < outcomes.len() {
            // requeued orders may fit another drone
            self.notify();
        }
        accepted
    }

    async fn dispatch(&self, order: Order, drone: DroneIdentifier) -> bool {
        match self.client.assign_order(&drone, &order).await {
            Ok(AssignOutcome::Accepted) => {
                info!(%drone, %order, "Order assigned");
                metrics::counter!("dronering_orders_assigned_total").increment(1);
                self.store.mark_assigned_order(&drone, order);
                self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                true
            }
            Ok(AssignOutcome::Refused) => {
                debug!(%drone, order = %order.id, "order refused, requeueing");
                self.store.mark_refusing_orders(&drone);
                self.requeue(order);
                false
            }
            Err(e) => {
                warn!(%drone, order = %order.id, error = %e, "Drone unreachable, requeueing order");
                self.store.signal_unreachable(&drone);
                self.requeue(order);
                false
            }
        }
    }

    fn requeue(&self, order: Order) {
        metrics::counter!("dronering_orders_requeued_total").increment(1);
        self.queue.lock().push_back(order);
    }
}

/// Index of the best drone for `order`: closest to its start point, then
/// more battery, then higher id.
fn closest_drone(order: &Order, available: &[(DroneIdentifier, DroneStatus)]) -> Option<usize> {
    available
        .iter()
        .enumerate()
        .min_by(|(_, (a_id, a)), (_, (b_id, b))| {
            let da = a.position.distance_to(&order.start_point);
            let db = b.position.distance_to(&order.start_point);
            da.total_cmp(&db)
                .then_with(|| b.battery_percent.cmp(&a.battery_percent))
                .then_with(|| b_id.id().cmp(&a_id.id()))
        })
        .map(|(index, _)| index)
}
