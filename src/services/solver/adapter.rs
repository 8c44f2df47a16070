//! Adapter to build vrp-pragmatic inputs.
//!
//! Locations are matrix index references; times are RFC 3339 on the UTC
//! date of the departure instant. The vehicle shift is open-ended: routes
//! finish at the last pickup and the shift budget is enforced by the
//! schedule walk on the way back out.

use chrono::{Datelike, NaiveDate};
use serde_json::{json, Value};
use vrp_pragmatic::format::problem::Matrix;

use crate::services::matrix::TravelMatrix;

use super::problem::SolverProblem;

pub const DEFAULT_PROFILE: &str = "car";
pub const DEFAULT_VEHICLE_ID: &str = "shuttle_1";
pub const DEFAULT_VEHICLE_TYPE: &str = "shuttle";

/// Build the pragmatic problem JSON
pub fn build_pragmatic_problem(problem: &SolverProblem) -> Value {
    let date = problem.departure.date_naive();

    let jobs: Vec<Value> = problem
        .stops
        .iter()
        .enumerate()
        .map(|(index, stop)| {
            json!({
                "id": stop.stop_id,
                "services": [{
                    "places": [{
                        "location": { "index": index + 1 },
                        "duration": stop.service_seconds(),
                        "times": [[
                            format_day_second(date, stop.window.earliest_seconds()),
                            format_day_second(date, stop.window.latest_seconds()),
                        ]]
                    }]
                }]
            })
        })
        .collect();

    json!({
        "plan": {
            "jobs": jobs
        },
        "fleet": {
            "vehicles": [{
                "typeId": DEFAULT_VEHICLE_TYPE,
                "vehicleIds": [DEFAULT_VEHICLE_ID],
                "profile": { "matrix": DEFAULT_PROFILE },
                "costs": {
                    "fixed": 0.0,
                    "distance": 0.0001,
                    "time": 1.0
                },
                "shifts": [{
                    "start": {
                        "earliest": format_day_second(date, problem.departure_second),
                        "location": { "index": 0 }
                    }
                }],
                "capacity": [100]
            }],
            "profiles": [{
                "name": DEFAULT_PROFILE
            }]
        }
    })
}

/// Build the pragmatic routing matrix from the travel matrix
pub fn build_pragmatic_matrix(matrix: &TravelMatrix, profile: &str) -> Matrix {
    let size = matrix.size;
    let mut travel_times = Vec::with_capacity(size * size);
    let mut distances = Vec::with_capacity(size * size);

    for i in 0..size {
        for j in 0..size {
            travel_times.push(matrix.duration(i, j) as i64);
            distances.push(matrix.distance(i, j) as i64);
        }
    }

    Matrix {
        profile: Some(profile.to_string()),
        timestamp: None,
        travel_times,
        distances,
        error_codes: None,
    }
}

fn format_day_second(date: NaiveDate, second_of_day: u32) -> String {
    let hours = second_of_day / 3600;
    let minutes = (second_of_day % 3600) / 60;
    let seconds = second_of_day % 60;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        date.year(),
        date.month(),
        date.day(),
        hours,
        minutes,
        seconds
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geo::Coordinates;
    use crate::types::stop::Stop;
    use crate::types::time::TimeWindow;
    use vrp_pragmatic::format::problem::Problem;

    fn test_problem() -> SolverProblem {
        SolverProblem::new(
            Coordinates::new(40.7128, -74.0060),
            vec![
                Stop {
                    stop_id: "stop-1".to_string(),
                    location: Coordinates::new(40.7282, -73.7949),
                    window: TimeWindow::new(480, 510).unwrap(),
                    service_minutes: 3,
                },
                Stop {
                    stop_id: "stop-2".to_string(),
                    location: Coordinates::new(40.6892, -74.0445),
                    window: TimeWindow::new(495, 525).unwrap(),
                    service_minutes: 5,
                },
            ],
            "2026-08-01T07:30:00Z".parse().unwrap(),
        )
    }

    fn uniform_matrix(size: usize) -> TravelMatrix {
        let mut matrix = TravelMatrix::zeroed(size);
        for i in 0..size {
            for j in 0..size {
                if i != j {
                    matrix.durations[i][j] = 600;
                    matrix.distances[i][j] = 5000;
                }
            }
        }
        matrix
    }

    #[test]
    fn test_problem_json_structure() {
        let json = build_pragmatic_problem(&test_problem());

        let jobs = json["plan"]["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["id"], "stop-1");
        assert_eq!(jobs[0]["services"][0]["places"][0]["location"]["index"], 1);
        assert_eq!(jobs[0]["services"][0]["places"][0]["duration"], 180);

        let vehicles = json["fleet"]["vehicles"].as_array().unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(
            vehicles[0]["shifts"][0]["start"]["earliest"],
            "2026-08-01T07:30:00Z"
        );
        // Open-ended shift: no end leg back to the origin
        assert!(vehicles[0]["shifts"][0].get("end").is_none());
    }

    #[test]
    fn test_window_times_on_departure_date() {
        let json = build_pragmatic_problem(&test_problem());
        let times = &json["plan"]["jobs"][0]["services"][0]["places"][0]["times"];
        assert_eq!(times[0][0], "2026-08-01T08:00:00Z");
        assert_eq!(times[0][1], "2026-08-01T08:30:00Z");
    }

    #[test]
    fn test_problem_json_deserializes_into_pragmatic_format() {
        let json = build_pragmatic_problem(&test_problem());
        let parsed: Result<Problem, _> = serde_json::from_value(json);
        assert!(parsed.is_ok(), "pragmatic rejected problem: {:?}", parsed.err());
    }

    #[test]
    fn test_matrix_is_row_major() {
        let matrix = build_pragmatic_matrix(&uniform_matrix(3), DEFAULT_PROFILE);
        assert_eq!(matrix.travel_times.len(), 9);
        assert_eq!(matrix.distances.len(), 9);
        assert_eq!(matrix.travel_times[0], 0);
        assert_eq!(matrix.travel_times[1], 600);
        assert_eq!(matrix.profile.as_deref(), Some(DEFAULT_PROFILE));
    }
}
