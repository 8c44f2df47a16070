//! vrp-pragmatic solver integration.

use std::collections::HashMap;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use vrp_cli::extensions::solve::config::{create_builder_from_config, Config, TerminationConfig};
use vrp_core::solver::Solver;
use vrp_pragmatic::format::problem::{Matrix, PragmaticProblem, Problem};
use vrp_pragmatic::format::solution::{
    write_pragmatic, PragmaticOutputType, Solution as PragmaticSolution,
};

use crate::services::matrix::TravelMatrix;

use super::adapter::{build_pragmatic_matrix, build_pragmatic_problem, DEFAULT_PROFILE};
use super::problem::SolverProblem;
use super::SolverConfig;

/// Solve with vrp-pragmatic. Returns the visit order as 0-based indices
/// into `problem.stops`; errors when any stop is left unassigned so the
/// caller can fall back.
pub fn solve_pragmatic(
    problem: &SolverProblem,
    matrix: &TravelMatrix,
    config: &SolverConfig,
) -> Result<Vec<usize>> {
    if problem.stops.is_empty() {
        return Ok(Vec::new());
    }

    let problem_json = build_pragmatic_problem(problem);
    let problem_format: Problem = serde_json::from_value(problem_json)
        .context("Failed to deserialize pragmatic problem")?;

    let pragmatic_matrix: Matrix = build_pragmatic_matrix(matrix, DEFAULT_PROFILE);
    let core_problem = (problem_format, vec![pragmatic_matrix])
        .read_pragmatic()
        .context("Failed to build core problem from pragmatic format")?;

    let core_problem = Arc::new(core_problem);
    let solver_config = build_solver_config(core_problem.clone(), config)?;

    let solution = Solver::new(core_problem.clone(), solver_config)
        .solve()
        .context("Failed to solve with vrp-pragmatic")?;

    let pragmatic = write_pragmatic_solution(core_problem.as_ref(), &solution)?;
    extract_order(problem, &pragmatic)
}

fn build_solver_config(
    problem: Arc<vrp_core::models::Problem>,
    config: &SolverConfig,
) -> Result<
    vrp_core::rosomaxa::evolution::EvolutionConfig<
        vrp_core::solver::RefinementContext,
        vrp_core::models::GoalContext,
        vrp_core::construction::heuristics::InsertionContext,
    >,
> {
    let config = Config {
        termination: Some(TerminationConfig {
            max_time: Some(config.max_time_seconds as usize),
            max_generations: Some(config.max_generations),
            variation: None,
        }),
        evolution: None,
        hyper: None,
        environment: None,
        telemetry: None,
        output: None,
    };

    let builder = create_builder_from_config(problem, Vec::new(), &config)
        .context("Failed to create solver builder")?;

    builder.build().context("Failed to build solver configuration")
}

fn write_pragmatic_solution(
    problem: &vrp_core::models::Problem,
    solution: &vrp_core::models::Solution,
) -> Result<PragmaticSolution> {
    let mut writer = BufWriter::new(Vec::new());
    write_pragmatic(problem, solution, PragmaticOutputType::default(), &mut writer)
        .context("Failed to serialize pragmatic solution")?;

    let bytes = writer.into_inner().context("Failed to flush solution writer")?;
    let json = String::from_utf8(bytes).context("Solution is not valid UTF-8")?;
    let parsed: PragmaticSolution =
        serde_json::from_str(&json).context("Failed to parse pragmatic solution JSON")?;

    Ok(parsed)
}

/// Pull the visit order out of the pragmatic solution
fn extract_order(problem: &SolverProblem, solution: &PragmaticSolution) -> Result<Vec<usize>> {
    if let Some(unassigned) = &solution.unassigned {
        if !unassigned.is_empty() {
            let ids: Vec<&str> = unassigned.iter().map(|job| job.job_id.as_str()).collect();
            anyhow::bail!("pragmatic left stops unassigned: {}", ids.join(", "));
        }
    }

    let mut index_by_id: HashMap<&str, usize> = HashMap::new();
    for (index, stop) in problem.stops.iter().enumerate() {
        index_by_id.insert(stop.stop_id.as_str(), index);
    }

    let mut order = Vec::with_capacity(problem.stops.len());

    if let Some(tour) = solution.tours.first() {
        for stop in &tour.stops {
            for activity in stop.activities() {
                if activity.activity_type == "departure" || activity.activity_type == "arrival" {
                    continue;
                }
                match index_by_id.get(activity.job_id.as_str()) {
                    Some(&index) => order.push(index),
                    None => anyhow::bail!(
                        "solution names unknown job '{}'",
                        activity.job_id
                    ),
                }
            }
        }
    }

    if order.len() != problem.stops.len() {
        anyhow::bail!(
            "solution covers {} of {} stops",
            order.len(),
            problem.stops.len()
        );
    }

    Ok(order)
}
