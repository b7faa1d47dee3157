// SPDX-License-Identifier: AGPL-3.0
//! # Drone Status Snapshot
//!
//! [`DroneStatus`] is replaced wholesale on every state change. All the
//! transition helpers consume `&self` and return a fresh snapshot; nothing
//! mutates a status in place.

use crate::domain::geo::CityPoint;
use crate::domain::order::Order;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default low-battery percentage. Fleets configure their own through
/// `spec.battery.low_threshold`.
pub const LOW_BATTERY_THRESHOLD: u8 = 15;

pub const FULL_BATTERY: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroneStatus {
    pub position: CityPoint,
    pub battery_percent: u8,
    pub assigned_order: Option<Order>,
    pub accepting_orders: bool,
}

impl DroneStatus {
    /// Fresh drone: full battery, idle, accepting orders.
    pub fn new(position: CityPoint) -> Self {
        Self::with_battery(position, FULL_BATTERY)
    }

    pub fn with_battery(position: CityPoint, battery_percent: u8) -> Self {
        Self {
            position,
            battery_percent: battery_percent.min(FULL_BATTERY),
            assigned_order: None,
            accepting_orders: true,
        }
    }

    /// Strictly below `threshold` percent.
    pub fn is_low_battery(&self, threshold: u8) -> bool {
        self.battery_percent < threshold
    }

    pub fn is_delivering(&self) -> bool {
        self.assigned_order.is_some()
    }

    /// Eligible for a new assignment right now. Low drones never get orders.
    pub fn is_available_for_deliveries(&self, low_battery_threshold: u8) -> bool {
        !self.is_low_battery(low_battery_threshold)
            && self.assigned_order.is_none()
            && self.accepting_orders
    }

    /// Take on `order`. Assigning to a drone that already carries an order is a
    /// protocol bug.
    pub fn assign(&self, order: Order) -> Self {
        assert!(
            self.assigned_order.is_none(),
            "order {} assigned to a drone already delivering {:?}",
            order.id,
            self.assigned_order.as_ref().map(|o| o.id)
        );
        Self {
            assigned_order: Some(order),
            ..self.clone()
        }
    }

    /// Finish the current delivery: move to the drop point and drain battery.
    pub fn complete_delivery(&self, battery_cost: u8) -> Self {
        let order = self
            .assigned_order
            .as_ref()
            .expect("complete_delivery called without an assigned order");
        Self {
            position: order.delivery_point,
            battery_percent: self.battery_percent.saturating_sub(battery_cost),
            assigned_order: None,
            accepting_orders: self.accepting_orders,
        }
    }

    pub fn refusing_orders(&self) -> Self {
        Self {
            accepting_orders: false,
            ..self.clone()
        }
    }

    /// Parked at the charging bay with a full battery. Any order still on
    /// record is kept.
    pub fn recharged(&self) -> Self {
        Self {
            position: CityPoint::CHARGING_BAY,
            battery_percent: FULL_BATTERY,
            assigned_order: self.assigned_order.clone(),
            accepting_orders: true,
        }
    }
}

impl fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<position={}, battery={}%, order={}, accepting={}>",
            self.position,
            self.battery_percent,
            self.assigned_order
                .as_ref()
                .map(|o| o.id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.accepting_orders
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new(
            9,
            CityPoint::new(1, 1).unwrap(),
            CityPoint::new(5, 5).unwrap(),
        )
    }

    #[test]
    fn test_low_battery_threshold() {
        let p = CityPoint::new(0, 0).unwrap();
        assert!(DroneStatus::with_battery(p, 14).is_low_battery(LOW_BATTERY_THRESHOLD));
        assert!(!DroneStatus::with_battery(p, 15).is_low_battery(LOW_BATTERY_THRESHOLD));
        assert!(!DroneStatus::with_battery(p, 12).is_low_battery(5));
        assert!(DroneStatus::with_battery(p, 20).is_low_battery(30));
    }

    #[test]
    fn test_availability() {
        let p = CityPoint::new(2, 2).unwrap();
        let status = DroneStatus::new(p);
        assert!(status.is_available_for_deliveries(LOW_BATTERY_THRESHOLD));
        assert!(!status.assign(order()).is_available_for_deliveries(LOW_BATTERY_THRESHOLD));
        assert!(!status.refusing_orders().is_available_for_deliveries(LOW_BATTERY_THRESHOLD));
        assert!(!DroneStatus::with_battery(p, 10).is_available_for_deliveries(LOW_BATTERY_THRESHOLD));
        assert!(DroneStatus::with_battery(p, 10).is_available_for_deliveries(5));
    }

    #[test]
    fn test_complete_delivery_moves_and_drains() {
        let status = DroneStatus::new(CityPoint::new(0, 0).unwrap()).assign(order());
        let done = status.complete_delivery(10);
        assert_eq!(done.position, CityPoint::new(5, 5).unwrap());
        assert_eq!(done.battery_percent, 90);
        assert!(done.assigned_order.is_none());
    }

    #[test]
    fn test_battery_never_underflows() {
        let status = DroneStatus::with_battery(CityPoint::new(0, 0).unwrap(), 4).assign(order());
        assert_eq!(status.complete_delivery(10).battery_percent, 0);
    }

    #[test]
    #[should_panic(expected = "already delivering")]
    fn test_double_assignment_is_a_bug() {
        let status = DroneStatus::new(CityPoint::new(0, 0).unwrap()).assign(order());
        let _ = status.assign(order());
    }

    #[test]
    fn test_recharged_parks_at_bay() {
        let status = DroneStatus::with_battery(CityPoint::new(7, 7).unwrap(), 20).refusing_orders();
        let charged = status.recharged();
        assert_eq!(charged.position, CityPoint::CHARGING_BAY);
        assert_eq!(charged.battery_percent, 100);
        assert!(charged.accepting_orders);
    }
}
