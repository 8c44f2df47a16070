//! Single-vehicle routing problem definition
//!
//! Node 0 is the driver origin, nodes 1..=N the pickup stops. All solver
//! arithmetic runs in seconds of the UTC day anchored at the departure
//! instant's date.

use chrono::{DateTime, Timelike, Utc};

use crate::types::geo::Coordinates;
use crate::types::stop::Stop;

/// Permitted early-arrival wait before a window opens
pub const DEFAULT_SLACK_MINUTES: u32 = 30;

/// Route duration cap (10-hour shift)
pub const DEFAULT_BUDGET_MINUTES: u32 = 600;

#[derive(Debug, Clone)]
pub struct SolverProblem {
    /// Node 0
    pub origin: Coordinates,
    /// Nodes 1..=stops.len(), caller order
    pub stops: Vec<Stop>,
    /// Departure instant, anchors the wall clock
    pub departure: DateTime<Utc>,
    /// Seconds of day at departure
    pub departure_second: u32,
    pub slack_seconds: u32,
    pub budget_seconds: u32,
}

impl SolverProblem {
    pub fn new(origin: Coordinates, stops: Vec<Stop>, departure: DateTime<Utc>) -> Self {
        Self {
            origin,
            stops,
            departure,
            departure_second: departure.num_seconds_from_midnight(),
            slack_seconds: DEFAULT_SLACK_MINUTES * 60,
            budget_seconds: DEFAULT_BUDGET_MINUTES * 60,
        }
    }

    /// Origin followed by the stops, matching matrix indices
    pub fn locations(&self) -> Vec<Coordinates> {
        let mut locations = Vec::with_capacity(self.stops.len() + 1);
        locations.push(self.origin);
        for stop in &self.stops {
            locations.push(stop.location);
        }
        locations
    }

    /// Service seconds at a matrix node (zero at the origin)
    pub fn service_seconds(&self, node: usize) -> u32 {
        if node == 0 {
            0
        } else {
            self.stops[node - 1].service_seconds()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::time::TimeWindow;

    fn stop(id: &str, lat: f64, lng: f64) -> Stop {
        Stop {
            stop_id: id.to_string(),
            location: Coordinates::new(lat, lng),
            window: TimeWindow::new(480, 540).unwrap(),
            service_minutes: 5,
        }
    }

    #[test]
    fn test_locations_origin_first() {
        let problem = SolverProblem::new(
            Coordinates::new(40.7128, -74.0060),
            vec![stop("a", 40.72, -73.79), stop("b", 40.68, -74.04)],
            "2026-08-01T07:30:00Z".parse().unwrap(),
        );

        let locations = problem.locations();
        assert_eq!(locations.len(), 3);
        assert!((locations[0].lat - 40.7128).abs() < 1e-9);
        assert!((locations[1].lat - 40.72).abs() < 1e-9);
    }

    #[test]
    fn test_departure_second_of_day() {
        let problem = SolverProblem::new(
            Coordinates::new(40.7128, -74.0060),
            vec![],
            "2026-08-01T07:30:00Z".parse().unwrap(),
        );
        assert_eq!(problem.departure_second, 7 * 3600 + 30 * 60);
    }

    #[test]
    fn test_service_seconds_zero_at_origin() {
        let problem = SolverProblem::new(
            Coordinates::new(40.7128, -74.0060),
            vec![stop("a", 40.72, -73.79)],
            "2026-08-01T07:30:00Z".parse().unwrap(),
        );
        assert_eq!(problem.service_seconds(0), 0);
        assert_eq!(problem.service_seconds(1), 300);
    }
}
