//! Route enrichment
//!
//! Turns a solved visit order into the public itinerary: per-stop ETAs,
//! kilometre/minute totals, the coordinates-only navigation URL and the
//! optimization score against the caller's input order.

use crate::services::matrix::TravelMatrix;
use crate::services::solver::{walk_unchecked, SolvedRoute, SolverProblem};
use crate::types::api::{OptimizeRouteResponse, OptimizedStop};
use crate::types::geo::Coordinates;
use crate::types::session::PlannedStop;
use crate::types::time::minutes_to_time_str;

/// Build the public response for a solved route
pub fn build_response(
    driver_id: &str,
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    solved: &SolvedRoute,
) -> OptimizeRouteResponse {
    let optimized_stops = optimized_stops(problem, solved);

    let total_seconds = solved.schedule.elapsed_seconds(problem.departure_second);
    let naive_seconds = naive_duration_seconds(problem, matrix);

    let ordered_locations: Vec<Coordinates> = solved
        .order
        .iter()
        .map(|&index| problem.stops[index].location)
        .collect();

    OptimizeRouteResponse {
        driver_id: driver_id.to_string(),
        optimized_stops,
        total_distance_km: solved.schedule.total_meters as f64 / 1000.0,
        total_duration_minutes: round_minutes(total_seconds),
        google_maps_url: build_maps_url(&problem.origin, &ordered_locations),
        optimization_score: optimization_score(total_seconds, naive_seconds),
    }
}

/// The itinerary entries retained in the driver session
pub fn planned_stops(problem: &SolverProblem, solved: &SolvedRoute) -> Vec<PlannedStop> {
    solved
        .schedule
        .legs
        .iter()
        .enumerate()
        .map(|(position, leg)| {
            let stop = &problem.stops[leg.stop_index];
            PlannedStop {
                stop_id: stop.stop_id.clone(),
                location: stop.location,
                window: stop.window,
                service_minutes: stop.service_minutes,
                sequence: (position + 1) as u32,
                arrival_minute: (leg.arrival_second / 60) as u16,
                departure_minute: (leg.departure_second / 60) as u16,
            }
        })
        .collect()
}

fn optimized_stops(problem: &SolverProblem, solved: &SolvedRoute) -> Vec<OptimizedStop> {
    solved
        .schedule
        .legs
        .iter()
        .enumerate()
        .map(|(position, leg)| {
            let stop = &problem.stops[leg.stop_index];
            OptimizedStop {
                stop_id: stop.stop_id.clone(),
                sequence: (position + 1) as u32,
                location: stop.location,
                arrival_time: minutes_to_time_str((leg.arrival_second / 60) as u16),
                departure_time: minutes_to_time_str((leg.departure_second / 60) as u16),
            }
        })
        .collect()
}

/// Navigation URL: origin first, then the stops in visit order, 6-dp
/// coordinates only. Stop identifiers must never appear here.
pub fn build_maps_url(origin: &Coordinates, ordered: &[Coordinates]) -> String {
    let mut url = String::from("https://www.google.com/maps/dir/");
    url.push_str(&origin.to_fixed6());
    for location in ordered {
        url.push('/');
        url.push_str(&location.to_fixed6());
    }
    url
}

/// Duration of driving the stops in caller order through the same matrix.
/// Feasibility is irrelevant; this is only the scoring reference.
pub fn naive_duration_seconds(problem: &SolverProblem, matrix: &TravelMatrix) -> u32 {
    let identity: Vec<usize> = (0..problem.stops.len()).collect();
    walk_unchecked(problem, matrix, &identity).elapsed_seconds(problem.departure_second)
}

/// `1 − total/naive`, clipped to [0, 1]
pub fn optimization_score(total_seconds: u32, naive_seconds: u32) -> f64 {
    if naive_seconds == 0 {
        return 0.0;
    }
    (1.0 - total_seconds as f64 / naive_seconds as f64).clamp(0.0, 1.0)
}

fn round_minutes(seconds: u32) -> u32 {
    (seconds + 30) / 60
}
