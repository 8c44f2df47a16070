//! Fallback heuristic solver
//!
//! Cheapest-arc construction that only considers time-window-feasible
//! extensions, followed by 2-opt and relocate local search. Every candidate
//! order is validated by the schedule walk, so slack and the route budget
//! hold by construction. Randomized restarts run until the deadline.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::services::matrix::TravelMatrix;

use super::problem::SolverProblem;
use super::schedule::{walk, Schedule, ScheduleViolation};

/// Restart cap; the deadline usually cuts in first
const MAX_RESTARTS: u64 = 64;

/// Randomized construction picks among this many nearest feasible stops
const CANDIDATE_POOL: usize = 3;

/// Solve by construction + local search. Returns the best feasible order,
/// or the violation that blocked the most constrained stop when nothing
/// feasible was found.
pub fn solve(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    deadline: Instant,
) -> Result<Vec<usize>, ScheduleViolation> {
    let n = problem.stops.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut best: Option<(Vec<usize>, Schedule)> = None;
    let mut last_violation: Option<ScheduleViolation> = None;

    let consider = |order: Vec<usize>,
                        best: &mut Option<(Vec<usize>, Schedule)>,
                        last_violation: &mut Option<ScheduleViolation>| {
        match walk(problem, matrix, &order) {
            Ok(schedule) => {
                let better = match best {
                    Some((_, incumbent)) => {
                        (schedule.total_travel_seconds, schedule.end_second)
                            < (incumbent.total_travel_seconds, incumbent.end_second)
                    }
                    None => true,
                };
                if better {
                    *best = Some((order, schedule));
                }
            }
            Err(violation) => *last_violation = Some(violation),
        }
    };

    // Deterministic seeds: pure cheapest-arc, then deadline order
    if let Some(order) = construct(problem, matrix, None, &mut last_violation) {
        let order = local_search(order, problem, matrix, deadline);
        consider(order, &mut best, &mut last_violation);
    }

    let mut by_deadline: Vec<usize> = (0..n).collect();
    by_deadline.sort_by_key(|&i| (problem.stops[i].window.latest, problem.stops[i].window.earliest));
    let by_deadline = local_search(by_deadline, problem, matrix, deadline);
    consider(by_deadline, &mut best, &mut last_violation);

    // Randomized restarts until the deadline
    for restart in 0..MAX_RESTARTS {
        if Instant::now() >= deadline {
            break;
        }
        let mut rng = StdRng::seed_from_u64(restart);
        if let Some(order) = construct(problem, matrix, Some(&mut rng), &mut last_violation) {
            let order = local_search(order, problem, matrix, deadline);
            consider(order, &mut best, &mut last_violation);
        }
    }

    match best {
        Some((order, schedule)) => {
            debug!(
                "Heuristic solution: {} stops, travel {} s",
                order.len(),
                schedule.total_travel_seconds
            );
            Ok(order)
        }
        None => Err(last_violation.unwrap_or(ScheduleViolation::BudgetExceeded {
            elapsed_minutes: 0,
            budget_minutes: problem.budget_seconds / 60,
        })),
    }
}

/// Cheapest-arc construction over feasible extensions. With an rng, picks
/// randomly among the nearest few instead of strictly the nearest.
fn construct(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    mut rng: Option<&mut StdRng>,
    last_violation: &mut Option<ScheduleViolation>,
) -> Option<Vec<usize>> {
    let n = problem.stops.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut clock = problem.departure_second;
    let mut prev_node = 0usize;

    while order.len() < n {
        // Feasible extensions with their travel cost
        let mut candidates: Vec<(usize, u32)> = Vec::new();

        for i in 0..n {
            if visited[i] {
                continue;
            }
            let stop = &problem.stops[i];
            let node = i + 1;

            if !matrix.is_reachable(prev_node, node) {
                continue;
            }

            let travel = matrix.duration(prev_node, node);
            let raw_arrival = clock + travel;
            if raw_arrival > stop.window.latest_seconds() {
                continue;
            }

            let service_start = raw_arrival.max(stop.window.earliest_seconds());
            if service_start - raw_arrival > problem.slack_seconds {
                continue;
            }

            let departure = service_start + stop.service_seconds();
            if departure - problem.departure_second > problem.budget_seconds {
                continue;
            }

            candidates.push((i, travel));
        }

        if candidates.is_empty() {
            // Record why the tightest remaining stop cannot be reached
            record_blocking_violation(problem, matrix, clock, prev_node, &visited, last_violation);
            return None;
        }

        candidates.sort_by_key(|&(_, travel)| travel);

        let chosen = match rng.as_deref_mut() {
            Some(rng) => {
                let pool = candidates.len().min(CANDIDATE_POOL);
                candidates[..pool]
                    .choose(rng)
                    .map(|&(i, _)| i)
                    .unwrap_or(candidates[0].0)
            }
            None => candidates[0].0,
        };

        let stop = &problem.stops[chosen];
        let travel = matrix.duration(prev_node, chosen + 1);
        let service_start = (clock + travel).max(stop.window.earliest_seconds());
        clock = service_start + stop.service_seconds();
        prev_node = chosen + 1;
        visited[chosen] = true;
        order.push(chosen);
    }

    Some(order)
}

fn record_blocking_violation(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    clock: u32,
    prev_node: usize,
    visited: &[bool],
    last_violation: &mut Option<ScheduleViolation>,
) {
    // The stop with the earliest deadline is the one the order is dying on
    let tightest = (0..problem.stops.len())
        .filter(|&i| !visited[i])
        .min_by_key(|&i| problem.stops[i].window.latest);

    let Some(i) = tightest else { return };
    let stop = &problem.stops[i];
    let node = i + 1;

    let violation = if !matrix.is_reachable(prev_node, node) {
        ScheduleViolation::Unreachable {
            stop_id: stop.stop_id.clone(),
        }
    } else {
        let raw_arrival = clock + matrix.duration(prev_node, node);
        if raw_arrival > stop.window.latest_seconds() {
            ScheduleViolation::WindowMissed {
                stop_id: stop.stop_id.clone(),
                arrival_minute: (raw_arrival / 60).min(u16::MAX as u32) as u16,
                latest_minute: stop.window.latest,
            }
        } else {
            let wait = stop.window.earliest_seconds().saturating_sub(raw_arrival);
            if wait > problem.slack_seconds {
                ScheduleViolation::ExcessWait {
                    stop_id: stop.stop_id.clone(),
                    wait_minutes: wait / 60,
                    slack_minutes: problem.slack_seconds / 60,
                }
            } else {
                // Only the shift budget can have excluded it
                let departure = raw_arrival.max(stop.window.earliest_seconds())
                    + stop.service_seconds();
                ScheduleViolation::BudgetExceeded {
                    elapsed_minutes: departure.saturating_sub(problem.departure_second) / 60,
                    budget_minutes: problem.budget_seconds / 60,
                }
            }
        }
    };

    *last_violation = Some(violation);
}

/// 2-opt + relocate, feasibility-checked, first-improvement, until no move
/// helps or the deadline passes
fn local_search(
    mut order: Vec<usize>,
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    deadline: Instant,
) -> Vec<usize> {
    let n = order.len();
    if n < 2 {
        return order;
    }

    let mut current_cost = match walk(problem, matrix, &order) {
        Ok(schedule) => (schedule.total_travel_seconds, schedule.end_second),
        Err(_) => return order,
    };

    let mut improved = true;
    while improved && Instant::now() < deadline {
        improved = false;

        // 2-opt: reverse a segment
        'two_opt: for i in 0..n - 1 {
            for j in i + 1..n {
                let mut candidate = order.clone();
                candidate[i..=j].reverse();
                if let Ok(schedule) = walk(problem, matrix, &candidate) {
                    let cost = (schedule.total_travel_seconds, schedule.end_second);
                    if cost < current_cost {
                        order = candidate;
                        current_cost = cost;
                        improved = true;
                        break 'two_opt;
                    }
                }
            }
        }

        // Relocate: move one stop to another position
        'relocate: for from in 0..n {
            for to in 0..n {
                if from == to {
                    continue;
                }
                let mut candidate = order.clone();
                let stop = candidate.remove(from);
                candidate.insert(to, stop);
                if let Ok(schedule) = walk(problem, matrix, &candidate) {
                    let cost = (schedule.total_travel_seconds, schedule.end_second);
                    if cost < current_cost {
                        order = candidate;
                        current_cost = cost;
                        improved = true;
                        break 'relocate;
                    }
                }
            }
        }
    }

    order
}
