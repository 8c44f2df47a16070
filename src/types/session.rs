//! Driver session state
//!
//! One record per active driver, serialised into the session KV bucket.
//! Holds only opaque identifiers, coordinates, durations and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::api::OptimizedStop;
use super::geo::Coordinates;
use super::stop::Stop;
use super::time::{minutes_to_time_str, TimeWindow};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    Completed,
}

/// Out-of-band roster change awaiting a reroute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopChange {
    Added,
    Cancelled,
}

/// Last known GPS fix
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsFix {
    pub location: Coordinates,
    pub at: DateTime<Utc>,
}

/// A stop in the published itinerary, with enough context to re-project
/// and re-optimise it later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStop {
    pub stop_id: String,
    pub location: Coordinates,
    pub window: TimeWindow,
    pub service_minutes: u16,
    /// 1-based position in the published order
    pub sequence: u32,
    /// Scheduled arrival, minutes of day
    pub arrival_minute: u16,
    /// Scheduled departure, minutes of day
    pub departure_minute: u16,
}

impl PlannedStop {
    pub fn to_stop(&self) -> Stop {
        Stop {
            stop_id: self.stop_id.clone(),
            location: self.location,
            window: self.window,
            service_minutes: self.service_minutes,
        }
    }

    pub fn to_optimized(&self) -> OptimizedStop {
        OptimizedStop {
            stop_id: self.stop_id.clone(),
            sequence: self.sequence,
            location: self.location,
            arrival_time: minutes_to_time_str(self.arrival_minute),
            departure_time: minutes_to_time_str(self.departure_minute),
        }
    }
}

/// Per-driver live tracking record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub driver_id: String,
    /// Remaining itinerary, most recently published order
    pub route: Vec<PlannedStop>,
    pub last_gps: Option<GpsFix>,
    /// Append-only within the session lifetime
    pub completed_stop_ids: Vec<String>,
    /// Remaining-route duration captured when the route was published
    pub baseline_remaining_minutes: u32,
    pub last_reroute_at: Option<DateTime<Utc>>,
    pub stops_changed: Option<StopChange>,
    pub status: SessionStatus,
    /// Consecutive reroute attempts that failed; reset on success
    pub reroute_failures: u32,
}

impl DriverSession {
    pub fn new(driver_id: impl Into<String>) -> Self {
        Self {
            driver_id: driver_id.into(),
            route: Vec::new(),
            last_gps: None,
            completed_stop_ids: Vec::new(),
            baseline_remaining_minutes: 0,
            last_reroute_at: None,
            stops_changed: None,
            status: SessionStatus::Idle,
            reroute_failures: 0,
        }
    }

    /// Next stop the driver is headed to
    pub fn head(&self) -> Option<&PlannedStop> {
        self.route.first()
    }

    /// Remaining stops as solver input
    pub fn remaining_stops(&self) -> Vec<Stop> {
        self.route.iter().map(PlannedStop::to_stop).collect()
    }

    /// Apply a head completion. Returns false when `stop_id` does not match
    /// the current head; the session is left untouched in that case.
    pub fn complete_head(&mut self, stop_id: &str) -> bool {
        match self.route.first() {
            Some(head) if head.stop_id == stop_id => {
                let done = self.route.remove(0);
                self.completed_stop_ids.push(done.stop_id);
                if self.route.is_empty() {
                    self.status = SessionStatus::Completed;
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(stop_id: &str, sequence: u32) -> PlannedStop {
        PlannedStop {
            stop_id: stop_id.to_string(),
            location: Coordinates::new(40.7, -74.0),
            window: TimeWindow::new(480, 540).unwrap(),
            service_minutes: 5,
            sequence,
            arrival_minute: 490,
            departure_minute: 495,
        }
    }

    #[test]
    fn test_complete_head_advances_route() {
        let mut session = DriverSession::new("drv-1");
        session.route = vec![planned("stop-1", 1), planned("stop-2", 2)];
        session.status = SessionStatus::Active;

        assert!(session.complete_head("stop-1"));
        assert_eq!(session.route.len(), 1);
        assert_eq!(session.completed_stop_ids, vec!["stop-1"]);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_complete_head_rejects_non_head() {
        let mut session = DriverSession::new("drv-1");
        session.route = vec![planned("stop-1", 1), planned("stop-2", 2)];

        assert!(!session.complete_head("stop-2"));
        assert_eq!(session.route.len(), 2);
        assert!(session.completed_stop_ids.is_empty());
    }

    #[test]
    fn test_last_completion_finishes_session() {
        let mut session = DriverSession::new("drv-1");
        session.route = vec![planned("stop-1", 1)];
        session.status = SessionStatus::Active;

        assert!(session.complete_head("stop-1"));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_planned_stop_renders_times() {
        let stop = planned("stop-1", 1).to_optimized();
        assert_eq!(stop.arrival_time, "08:10");
        assert_eq!(stop.departure_time, "08:15");
    }

    #[test]
    fn test_session_round_trips_as_json() {
        let mut session = DriverSession::new("drv-1");
        session.route = vec![planned("stop-1", 1)];
        session.stops_changed = Some(StopChange::Added);

        let json = serde_json::to_string(&session).unwrap();
        let back: DriverSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.driver_id, "drv-1");
        assert_eq!(back.stops_changed, Some(StopChange::Added));
        assert_eq!(back.route.len(), 1);
    }
}
