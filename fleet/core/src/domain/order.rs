// SPDX-License-Identifier: AGPL-3.0

use crate::domain::geo::CityPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fleet-wide order id, assigned by the order source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delivery request: pick up at `start_point`, drop at `delivery_point`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub start_point: CityPoint,
    pub delivery_point: CityPoint,
}

impl Order {
    pub fn new(id: u64, start_point: CityPoint, delivery_point: CityPoint) -> Self {
        Self {
            id: OrderId(id),
            start_point,
            delivery_point,
        }
    }

    /// Random order on the city grid.
    pub fn random(id: u64) -> Self {
        Self::new(id, CityPoint::random(), CityPoint::random())
    }

    /// Distance a drone at `from` travels to complete this order.
    pub fn travel_distance_from(&self, from: &CityPoint) -> f64 {
        from.distance_to(&self.start_point) + self.start_point.distance_to(&self.delivery_point)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[order {} {} -> {}]",
            self.id, self.start_point, self.delivery_point
        )
    }
}
