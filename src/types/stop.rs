//! Pickup stop types
//!
//! `PickupStop` is the wire shape; `Stop` is the validated form the
//! pipeline and solver work with. Stop identifiers are opaque tokens and
//! must never be correlated with patient identity.

use serde::{Deserialize, Serialize};

use super::geo::Coordinates;
use super::time::TimeWindow;

/// Service duration bounds in minutes
pub const MIN_SERVICE_MINUTES: u16 = 1;
pub const MAX_SERVICE_MINUTES: u16 = 60;

/// A pickup stop as received from the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupStop {
    pub stop_id: String,
    pub location: Coordinates,
    /// Earliest pickup, "HH:MM"
    pub earliest_pickup: String,
    /// Latest pickup, "HH:MM"
    pub latest_pickup: String,
    pub service_time_minutes: u16,
}

/// A validated stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub location: Coordinates,
    pub window: TimeWindow,
    pub service_minutes: u16,
}

impl Stop {
    pub fn service_seconds(&self) -> u32 {
        self.service_minutes as u32 * 60
    }
}

/// Stop identifiers double as KV keys and subject tokens
pub fn is_valid_opaque_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}
