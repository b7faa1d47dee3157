// SPDX-License-Identifier: AGPL-3.0
//! # Drone Identity
//!
//! [`DroneIdentifier`] is the immutable address card of a fleet member.
//!
//! Ordering is by `id` first, which is what the ring successor computation
//! relies on. Equality compares every field so that two registrations reusing
//! an id from a different address are not silently merged in the membership
//! table; use [`DroneIdentifier::same_drone`] for id-only comparison.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Numeric fleet-wide drone id.
pub type DroneId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroneIdentifier {
    id: DroneId,
    address: String,
    port: u16,
}

impl DroneIdentifier {
    pub fn new(id: DroneId, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
        }
    }

    pub fn id(&self) -> DroneId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Id-only identity, used by the ring and election protocols.
    pub fn same_drone(&self, other: &DroneIdentifier) -> bool {
        self.id == other.id
    }
}

impl Hash for DroneIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Ord for DroneIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.address.cmp(&other.address))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for DroneIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DroneIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}:{}", self.id, self.address, self.port)
    }
}
