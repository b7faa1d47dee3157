// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Contracts between a drone and the outside world. No I/O here.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`middleware`] | `PeerClient`, `PeerServer`, `PeerError`, `JoinResponse`, `AssignOutcome` |
//! | [`admin`] | `AdminService`, `Registration`, `AdminError` |
//! | [`order_source`] | `OrderSource`, `OrderSink` |
//! | [`pollution`] | `SlidingWindow`, `PollutionTracker` |

pub mod admin;
pub mod middleware;
pub mod order_source;
pub mod pollution;

pub use admin::*;
pub use middleware::*;
pub use order_source::*;
pub use pollution::*;
