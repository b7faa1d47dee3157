// SPDX-License-Identifier: AGPL-3.0
//! # Membership / Ring Store
//!
//! The single owner of "who is in the fleet, what do we last know about them,
//! and who is master". Every other component goes through the operations
//! below; nothing else holds a reference to the underlying table.
//!
//! ## Ring order
//!
//! The logical ring is the peer set sorted by numeric id. The successor of a
//! drone is the smallest id strictly greater than its own, wrapping around to
//! the smallest id overall. A ring of one is a self-loop, which callers read as
//! "I am alone".
//!
//! ## Locking
//!
//! One coarse `parking_lot::Mutex` serialises every operation. Readers get
//! owned snapshots, so no caller ever iterates the live table.

use crate::domain::drone::DroneIdentifier;
use crate::domain::geo::CityPoint;
use crate::domain::order::Order;
use crate::domain::status::DroneStatus;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct MembershipTable {
    /// `None` means the identity is known but its status was never fetched.
    peers: BTreeMap<DroneIdentifier, Option<DroneStatus>>,
    master: Option<DroneIdentifier>,
}

impl MembershipTable {
    fn remove(&mut self, peer: &DroneIdentifier) -> bool {
        let removed = self.peers.remove(peer).is_some();
        if self.master.as_ref() == Some(peer) {
            self.master = None;
        }
        removed
    }
}

#[derive(Debug, Default)]
pub struct MembershipStore {
    table: Mutex<MembershipTable>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with a known peer set (statuses unknown).
    pub fn with_peers(peers: impl IntoIterator<Item = DroneIdentifier>) -> Self {
        let store = Self::new();
        for peer in peers {
            store.add_peer(peer);
        }
        store
    }

    /// Idempotent. A peer that is already known keeps its status.
    pub fn add_peer(&self, peer: DroneIdentifier) -> bool {
        let mut table = self.table.lock();
        if table.peers.contains_key(&peer) {
            return false;
        }
        debug!(%peer, "adding peer to membership");
        table.peers.insert(peer, None);
        true
    }

    /// Idempotent. Clears the master pointer when it pointed at `peer`.
    pub fn remove_peer(&self, peer: &DroneIdentifier) -> bool {
        self.table.lock().remove(peer)
    }

    /// Same as [`Self::remove_peer`], but always the consequence of a failed RPC.
    pub fn signal_unreachable(&self, peer: &DroneIdentifier) -> bool {
        let mut table = self.table.lock();
        let was_master = table.master.as_ref() == Some(peer);
        let removed = table.remove(peer);
        if removed {
            metrics::counter!("dronering_peer_unreachable_total").increment(1);
            if was_master {
                warn!(%peer, "master is unreachable, master pointer cleared");
            } else {
                info!(%peer, "peer is unreachable, removed from membership");
            }
        }
        removed
    }

    /// Upsert. Updating a peer we never heard of is tolerated but logged.
    pub fn update_status(&self, peer: &DroneIdentifier, status: DroneStatus) {
        let mut table = self.table.lock();
        if !table.peers.contains_key(peer) {
            warn!(%peer, "status update for a drone that was not recorded before");
        }
        table.peers.insert(peer.clone(), Some(status));
    }

    pub fn status(&self, peer: &DroneIdentifier) -> Option<DroneStatus> {
        self.table.lock().peers.get(peer).cloned().flatten()
    }

    pub fn contains(&self, peer: &DroneIdentifier) -> bool {
        self.table.lock().peers.contains_key(peer)
    }

    pub fn all_peers(&self) -> BTreeSet<DroneIdentifier> {
        self.table.lock().peers.keys().cloned().collect()
    }

    /// Every peer except `me`, in ring order.
    pub fn peers_except(&self, me: &DroneIdentifier) -> Vec<DroneIdentifier> {
        self.table
            .lock()
            .peers
            .keys()
            .filter(|peer| !peer.same_drone(me))
            .cloned()
            .collect()
    }

    /// Peers whose status is known, with that status.
    pub fn known_statuses(&self) -> Vec<(DroneIdentifier, DroneStatus)> {
        self.table
            .lock()
            .peers
            .iter()
            .filter_map(|(peer, status)| status.clone().map(|s| (peer.clone(), s)))
            .collect()
    }

    /// Snapshot of the drones that may receive a new order right now.
    pub fn available_for_deliveries(
        &self,
        low_battery_threshold: u8,
    ) -> Vec<(DroneIdentifier, DroneStatus)> {
        self.known_statuses()
            .into_iter()
            .filter(|(_, status)| status.is_available_for_deliveries(low_battery_threshold))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().peers.is_empty()
    }

    /// Ring successor of `of`.
    ///
    /// # Panics
    ///
    /// On an empty store; every drone is a member of its own ring, so an empty
    /// ring means the caller lost track of itself.
    pub fn next_in_ring(&self, of: &DroneIdentifier) -> DroneIdentifier {
        let table = self.table.lock();
        assert!(
            !table.peers.is_empty(),
            "next_in_ring({of}) called on an empty membership"
        );
        if table.peers.len() == 1 {
            return table.peers.keys().next().cloned().unwrap_or_else(|| of.clone());
        }
        let mut smallest: Option<&DroneIdentifier> = None;
        let mut successor: Option<&DroneIdentifier> = None;
        for peer in table.peers.keys() {
            if smallest.map_or(true, |s| peer.id() < s.id()) {
                smallest = Some(peer);
            }
            if peer.id() > of.id() && successor.map_or(true, |s| peer.id() < s.id()) {
                successor = Some(peer);
            }
        }
        successor
            .or(smallest)
            .cloned()
            .unwrap_or_else(|| of.clone())
    }

    /// Record `master` as the current master, adding it to the membership if
    /// it was not known yet.
    pub fn set_master(&self, master: DroneIdentifier) {
        let mut table = self.table.lock();
        if !table.peers.contains_key(&master) {
            debug!(%master, "master was not in membership, adding it");
            table.peers.insert(master.clone(), None);
        }
        table.master = Some(master);
    }

    pub fn master(&self) -> Option<DroneIdentifier> {
        self.table.lock().master.clone()
    }

    /// Record that `peer` accepted `order`.
    pub fn mark_assigned_order(&self, peer: &DroneIdentifier, order: Order) {
        let mut table = self.table.lock();
        let Some(Some(status)) = table.peers.get(peer) else {
            warn!(%peer, order = %order.id, "order accepted by a drone without a known status");
            return;
        };
        let updated = status.assign(order);
        table.peers.insert(peer.clone(), Some(updated));
    }

    /// Record that `peer` refused an order (it is charging or about to).
    pub fn mark_refusing_orders(&self, peer: &DroneIdentifier) {
        let mut table = self.table.lock();
        if let Some(Some(status)) = table.peers.get(peer) {
            let updated = status.refusing_orders();
            table.peers.insert(peer.clone(), Some(updated));
        }
    }

    /// Record that `peer` finished recharging.
    pub fn mark_charging_completed(&self, peer: &DroneIdentifier) {
        let mut table = self.table.lock();
        let updated = match table.peers.get(peer) {
            Some(Some(status)) => status.recharged(),
            _ => DroneStatus::new(CityPoint::CHARGING_BAY),
        };
        table.peers.insert(peer.clone(), Some(updated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone(id: u32) -> DroneIdentifier {
        DroneIdentifier::new(id, "localhost", 10_000 + id as u16)
    }

    fn store_of(ids: &[u32]) -> MembershipStore {
        MembershipStore::with_peers(ids.iter().map(|id| drone(*id)))
    }

    #[test]
    fn test_next_in_ring_successor_and_wrap() {
        let store = store_of(&[1, 2, 3]);
        assert_eq!(store.next_in_ring(&drone(1)), drone(2));
        assert_eq!(store.next_in_ring(&drone(2)), drone(3));
        assert_eq!(store.next_in_ring(&drone(3)), drone(1));
    }

    #[test]
    fn test_next_in_ring_sparse_ids() {
        let store = store_of(&[4, 17, 90, 12]);
        assert_eq!(store.next_in_ring(&drone(4)), drone(12));
        assert_eq!(store.next_in_ring(&drone(12)), drone(17));
        assert_eq!(store.next_in_ring(&drone(90)), drone(4));
        // not a member: still the next id up
        assert_eq!(store.next_in_ring(&drone(50)), drone(90));
    }

    #[test]
    fn test_next_in_ring_single_member_is_self_loop() {
        let store = store_of(&[1]);
        assert_eq!(store.next_in_ring(&drone(1)), drone(1));
    }

    #[test]
    #[should_panic(expected = "empty membership")]
    fn test_next_in_ring_on_empty_store_panics() {
        MembershipStore::new().next_in_ring(&drone(1));
    }

    #[test]
    fn test_add_is_idempotent_and_keeps_status() {
        let store = store_of(&[1]);
        let status = DroneStatus::new(CityPoint::new(4, 4).unwrap());
        store.update_status(&drone(1), status.clone());
        assert!(!store.add_peer(drone(1)));
        assert_eq!(store.status(&drone(1)), Some(status));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_clears_master() {
        let store = store_of(&[1, 2]);
        store.set_master(drone(2));
        assert!(store.remove_peer(&drone(2)));
        assert_eq!(store.master(), None);
        assert!(!store.remove_peer(&drone(2)));
    }

    #[test]
    fn test_signal_unreachable_keeps_other_master() {
        let store = store_of(&[1, 2, 3]);
        store.set_master(drone(3));
        assert!(store.signal_unreachable(&drone(2)));
        assert_eq!(store.master(), Some(drone(3)));
        assert!(store.signal_unreachable(&drone(3)));
        assert_eq!(store.master(), None);
        assert_eq!(store.all_peers().into_iter().collect::<Vec<_>>(), vec![drone(1)]);
    }

    #[test]
    fn test_update_status_of_unknown_peer_is_upsert() {
        let store = MembershipStore::new();
        store.update_status(&drone(5), DroneStatus::new(CityPoint::CHARGING_BAY));
        assert!(store.contains(&drone(5)));
    }

    #[test]
    fn test_available_for_deliveries_filters() {
        let store = store_of(&[1, 2, 3, 4, 5]);
        let p = CityPoint::new(1, 1).unwrap();
        let order = Order::new(1, p, p);
        store.update_status(&drone(1), DroneStatus::new(p));
        store.update_status(&drone(2), DroneStatus::with_battery(p, 10));
        store.update_status(&drone(3), DroneStatus::new(p).assign(order));
        store.update_status(&drone(4), DroneStatus::new(p).refusing_orders());
        // drone 5 status unknown

        let available: Vec<_> = store
            .available_for_deliveries(15)
            .into_iter()
            .map(|(d, _)| d.id())
            .collect();
        assert_eq!(available, vec![1]);

        let lenient: Vec<_> = store
            .available_for_deliveries(5)
            .into_iter()
            .map(|(d, _)| d.id())
            .collect();
        assert_eq!(lenient, vec![1, 2]);
    }

    #[test]
    fn test_mark_helpers() {
        let store = store_of(&[1]);
        let p = CityPoint::new(6, 6).unwrap();
        store.update_status(&drone(1), DroneStatus::with_battery(p, 40));

        store.mark_refusing_orders(&drone(1));
        assert!(!store.status(&drone(1)).unwrap().accepting_orders);

        store.mark_charging_completed(&drone(1));
        let status = store.status(&drone(1)).unwrap();
        assert_eq!(status.position, CityPoint::CHARGING_BAY);
        assert_eq!(status.battery_percent, 100);
        assert!(status.accepting_orders);

        store.mark_assigned_order(&drone(1), Order::new(3, p, p));
        assert!(store.status(&drone(1)).unwrap().is_delivering());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = store_of(&[1, 2]);
        let snapshot = store.all_peers();
        store.add_peer(drone(3));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.peers_except(&drone(1)), vec![drone(2), drone(3)]);
    }
}
