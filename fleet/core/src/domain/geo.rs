// SPDX-License-Identifier: AGPL-3.0
//! # City Grid (Fleet Domain)
//!
//! Positions on the bounded delivery grid. Every drone position, order start
//! point and delivery point is a [`CityPoint`]; distances are Euclidean.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Width of the city grid (x ranges over `0..CITY_WIDTH`).
pub const CITY_WIDTH: u8 = 10;

/// Height of the city grid (y ranges over `0..CITY_HEIGHT`).
pub const CITY_HEIGHT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("coordinates ({x}, {y}) are outside the {CITY_WIDTH}x{CITY_HEIGHT} city grid")]
    OutOfBounds { x: i64, y: i64 },
}

/// A point on the city grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPoint", into = "RawPoint")]
pub struct CityPoint {
    x: u8,
    y: u8,
}

impl CityPoint {
    /// The charging bay. Drones finishing a recharge are parked here.
    pub const CHARGING_BAY: CityPoint = CityPoint { x: 0, y: 0 };

    pub fn new(x: i64, y: i64) -> Result<Self, GridError> {
        if x < 0 || y < 0 || x >= i64::from(CITY_WIDTH) || y >= i64::from(CITY_HEIGHT) {
            return Err(GridError::OutOfBounds { x, y });
        }
        Ok(Self {
            x: x as u8,
            y: y as u8,
        })
    }

    /// Uniformly random point on the grid.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            x: rng.random_range(0..CITY_WIDTH),
            y: rng.random_range(0..CITY_HEIGHT),
        }
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn y(&self) -> u8 {
        self.y
    }

    pub fn distance_to(&self, other: &CityPoint) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for CityPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Serialize, Deserialize)]
struct RawPoint {
    x: i64,
    y: i64,
}

impl TryFrom<RawPoint> for CityPoint {
    type Error = GridError;

    fn try_from(raw: RawPoint) -> Result<Self, Self::Error> {
        CityPoint::new(raw.x, raw.y)
    }
}

impl From<CityPoint> for RawPoint {
    fn from(point: CityPoint) -> Self {
        RawPoint {
            x: i64::from(point.x),
            y: i64::from(point.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_bounds() {
        assert!(CityPoint::new(-1, 0).is_err());
        assert!(CityPoint::new(0, 10).is_err());
        assert!(CityPoint::new(10, 3).is_err());
        assert!(CityPoint::new(9, 9).is_ok());
    }

    #[test]
    fn test_distance() {
        let a = CityPoint::new(0, 0).unwrap();
        let b = CityPoint::new(3, 4).unwrap();
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(b.distance_to(&a), 5.0);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_random_stays_on_grid() {
        for _ in 0..200 {
            let p = CityPoint::random();
            assert!(p.x() < CITY_WIDTH && p.y() < CITY_HEIGHT);
        }
    }

    #[test]
    fn test_deserialize_validates_bounds() {
        let ok: CityPoint = serde_json::from_str(r#"{"x":2,"y":3}"#).unwrap();
        assert_eq!(ok, CityPoint::new(2, 3).unwrap());
        assert!(serde_json::from_str::<CityPoint>(r#"{"x":12,"y":3}"#).is_err());
    }
}
