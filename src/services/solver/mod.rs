//! Single-vehicle routing with time windows
//!
//! vrp-pragmatic does the heavy lifting; its output is re-validated by the
//! schedule walk because pragmatic does not cap early-arrival waiting or
//! the open-ended shift budget. Anything it cannot place, or places in
//! violation, goes to the in-crate heuristic. Only when both come up empty
//! is the problem declared infeasible.

pub mod adapter;
mod heuristic;
mod pragmatic;
pub mod problem;
pub mod schedule;

pub use problem::{SolverProblem, DEFAULT_BUDGET_MINUTES, DEFAULT_SLACK_MINUTES};
pub use schedule::{walk, walk_unchecked, Schedule, ScheduleLeg, ScheduleViolation};

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::matrix::TravelMatrix;

/// Configuration for the VRP solver
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Hard wall-clock limit in seconds
    pub max_time_seconds: u32,
    /// Metaheuristic generation cap
    pub max_generations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_time_seconds: 10,
            max_generations: 3000,
        }
    }
}

impl SolverConfig {
    pub fn new(max_time_seconds: u32) -> Self {
        Self {
            max_time_seconds,
            ..Default::default()
        }
    }

    /// Quick configuration for tests and interactive probes
    pub fn fast() -> Self {
        Self {
            max_time_seconds: 1,
            max_generations: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("no feasible visit order: {0}")]
    Infeasible(String),
}

/// A feasible visit order with its simulated schedule
#[derive(Debug, Clone)]
pub struct SolvedRoute {
    /// 0-based indices into the problem's stops, visit order
    pub order: Vec<usize>,
    pub schedule: Schedule,
    pub algorithm: &'static str,
    pub solve_time_ms: u64,
}

/// VRP solver facade
pub struct VrpSolver {
    config: SolverConfig,
}

impl VrpSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn solve(
        &self,
        problem: &SolverProblem,
        matrix: &TravelMatrix,
    ) -> Result<SolvedRoute, SolveError> {
        let started_at = Instant::now();
        let deadline = started_at + Duration::from_secs(self.config.max_time_seconds as u64);

        if problem.stops.is_empty() {
            debug!("No stops to optimize, returning empty route");
            return Ok(SolvedRoute {
                order: Vec::new(),
                schedule: Schedule {
                    end_second: problem.departure_second,
                    ..Default::default()
                },
                algorithm: "none",
                solve_time_ms: started_at.elapsed().as_millis() as u64,
            });
        }

        info!("Solving route over {} stops with vrp-pragmatic", problem.stops.len());

        match pragmatic::solve_pragmatic(problem, matrix, &self.config) {
            Ok(order) => match schedule::walk(problem, matrix, &order) {
                Ok(sched) => {
                    info!(
                        "Route solved with vrp-pragmatic: {} stops, {:.1} km",
                        order.len(),
                        sched.total_meters as f64 / 1000.0,
                    );
                    return Ok(SolvedRoute {
                        order,
                        schedule: sched,
                        algorithm: "vrp-pragmatic",
                        solve_time_ms: started_at.elapsed().as_millis() as u64,
                    });
                }
                Err(violation) => {
                    warn!(
                        "vrp-pragmatic solution fails validation ({}), trying heuristic",
                        violation
                    );
                }
            },
            Err(err) => {
                warn!("vrp-pragmatic failed, trying heuristic: {}", err);
            }
        }

        // The heuristic always runs its deterministic constructions, so a
        // spent deadline still yields any easy feasible order.
        match heuristic::solve(problem, matrix, deadline) {
            Ok(order) => {
                let sched = schedule::walk(problem, matrix, &order)
                    .expect("heuristic returned an invalid order");
                info!(
                    "Route solved with heuristic: {} stops, {:.1} km",
                    order.len(),
                    sched.total_meters as f64 / 1000.0,
                );
                Ok(SolvedRoute {
                    order,
                    schedule: sched,
                    algorithm: "heuristic",
                    solve_time_ms: started_at.elapsed().as_millis() as u64,
                })
            }
            Err(violation) => Err(SolveError::Infeasible(violation.to_string())),
        }
    }
}

impl Default for VrpSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}
