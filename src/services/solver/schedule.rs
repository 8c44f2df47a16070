//! Forward schedule simulation
//!
//! The walk is the single source of truth for arrival math: the heuristic
//! checks candidate orders with it, pragmatic output is re-validated
//! through it, the route builder renders from it, and the ingest worker
//! re-projects live schedules with the unchecked variant.

use std::fmt;

use crate::services::matrix::TravelMatrix;

use super::problem::SolverProblem;

/// One visited stop in a simulated schedule
#[derive(Debug, Clone)]
pub struct ScheduleLeg {
    /// Index into `problem.stops` (0-based)
    pub stop_index: usize,
    /// Seconds of day at service start
    pub arrival_second: u32,
    /// Seconds of day when the vehicle leaves
    pub departure_second: u32,
    pub travel_seconds: u32,
    pub travel_meters: u32,
    pub wait_seconds: u32,
}

/// A fully simulated visit order
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub legs: Vec<ScheduleLeg>,
    pub total_travel_seconds: u32,
    pub total_service_seconds: u32,
    pub total_wait_seconds: u32,
    pub total_meters: u32,
    /// Seconds of day at the end of the last service
    pub end_second: u32,
}

impl Schedule {
    /// Door-to-last-departure duration, waiting included
    pub fn elapsed_seconds(&self, departure_second: u32) -> u32 {
        self.end_second.saturating_sub(departure_second)
    }
}

/// Why an order cannot be driven
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleViolation {
    Unreachable {
        stop_id: String,
    },
    WindowMissed {
        stop_id: String,
        arrival_minute: u16,
        latest_minute: u16,
    },
    ExcessWait {
        stop_id: String,
        wait_minutes: u32,
        slack_minutes: u32,
    },
    BudgetExceeded {
        elapsed_minutes: u32,
        budget_minutes: u32,
    },
}

impl fmt::Display for ScheduleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { stop_id } => {
                write!(f, "stop '{}' is unreachable by road", stop_id)
            }
            Self::WindowMissed {
                stop_id,
                arrival_minute,
                latest_minute,
            } => write!(
                f,
                "time window infeasible: stop '{}' would be reached at minute {} after its window closes at minute {}",
                stop_id, arrival_minute, latest_minute
            ),
            Self::ExcessWait {
                stop_id,
                wait_minutes,
                slack_minutes,
            } => write!(
                f,
                "time window infeasible: stop '{}' would require waiting {} min, more than the {} min slack",
                stop_id, wait_minutes, slack_minutes
            ),
            Self::BudgetExceeded {
                elapsed_minutes,
                budget_minutes,
            } => write!(
                f,
                "route would take {} min, over the {} min shift budget",
                elapsed_minutes, budget_minutes
            ),
        }
    }
}

/// Simulate `order` (0-based stop indices) and enforce windows, slack and
/// the route budget.
pub fn walk(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    order: &[usize],
) -> Result<Schedule, ScheduleViolation> {
    walk_inner(problem, matrix, order, true)
}

/// Simulate without feasibility enforcement. Early arrivals still wait for
/// the window to open; late arrivals are serviced immediately. Used for the
/// naive baseline and live re-projection.
pub fn walk_unchecked(problem: &SolverProblem, matrix: &TravelMatrix, order: &[usize]) -> Schedule {
    walk_inner(problem, matrix, order, false).expect("unchecked walk cannot fail")
}

fn walk_inner(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    order: &[usize],
    enforce: bool,
) -> Result<Schedule, ScheduleViolation> {
    let mut schedule = Schedule {
        end_second: problem.departure_second,
        ..Default::default()
    };

    let mut clock = problem.departure_second;
    let mut prev_node = 0usize;

    for &stop_index in order {
        let stop = &problem.stops[stop_index];
        let node = stop_index + 1;

        if enforce && !matrix.is_reachable(prev_node, node) {
            return Err(ScheduleViolation::Unreachable {
                stop_id: stop.stop_id.clone(),
            });
        }

        let travel = matrix.duration(prev_node, node);
        let meters = matrix.distance(prev_node, node);
        let raw_arrival = clock + travel;

        let earliest = stop.window.earliest_seconds();
        let latest = stop.window.latest_seconds();

        if enforce && raw_arrival > latest {
            return Err(ScheduleViolation::WindowMissed {
                stop_id: stop.stop_id.clone(),
                arrival_minute: (raw_arrival / 60).min(u16::MAX as u32) as u16,
                latest_minute: stop.window.latest,
            });
        }

        let service_start = raw_arrival.max(earliest);
        let wait = service_start - raw_arrival;

        if enforce && wait > problem.slack_seconds {
            return Err(ScheduleViolation::ExcessWait {
                stop_id: stop.stop_id.clone(),
                wait_minutes: wait / 60,
                slack_minutes: problem.slack_seconds / 60,
            });
        }

        let service = stop.service_seconds();
        let departure = service_start + service;

        schedule.legs.push(ScheduleLeg {
            stop_index,
            arrival_second: service_start,
            departure_second: departure,
            travel_seconds: travel,
            travel_meters: meters,
            wait_seconds: wait,
        });
        schedule.total_travel_seconds += travel;
        schedule.total_service_seconds += service;
        schedule.total_wait_seconds += wait;
        schedule.total_meters += meters;
        schedule.end_second = departure;

        clock = departure;
        prev_node = node;
    }

    if enforce {
        let elapsed = schedule.elapsed_seconds(problem.departure_second);
        if elapsed > problem.budget_seconds {
            return Err(ScheduleViolation::BudgetExceeded {
                elapsed_minutes: elapsed / 60,
                budget_minutes: problem.budget_seconds / 60,
            });
        }
    }

    Ok(schedule)
}
