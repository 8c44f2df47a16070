//! Optimization pipeline
//!
//! The single entry point behind both the synchronous optimize subject and
//! the re-routing worker: validate, resolve the traffic matrix, solve,
//! enrich. Callers that already know the driver's live position pass it in
//! to displace the origin.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::services::builder;
use crate::services::matrix::{MatrixError, MatrixProvider};
use crate::services::solver::{SolveError, SolverConfig, SolverProblem, VrpSolver};
use crate::types::api::{OptimizeRouteRequest, OptimizeRouteResponse};
use crate::types::geo::Coordinates;
use crate::types::messages::error_codes;
use crate::types::session::PlannedStop;
use crate::types::stop::{
    is_valid_opaque_id, Stop, MAX_SERVICE_MINUTES, MIN_SERVICE_MINUTES,
};
use crate::types::time::TimeWindow;

/// Stops accepted per request unless configured otherwise
pub const DEFAULT_MAX_STOPS: usize = 25;

/// Tolerance before a departure counts as "in the past"
const PAST_DEPARTURE_GRACE_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("no feasible route: {0}")]
    NoFeasibleRoute(String),
    #[error("upstream provider failure: {0}")]
    UpstreamUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl OptimizeError {
    /// Stable code for the gateway's status mapping
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => error_codes::VALIDATION_ERROR,
            Self::NoFeasibleRoute(_) => error_codes::NO_FEASIBLE_ROUTE,
            Self::UpstreamUnavailable(_) => error_codes::UPSTREAM_UNAVAILABLE,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

impl From<MatrixError> for OptimizeError {
    fn from(error: MatrixError) -> Self {
        Self::UpstreamUnavailable(error.to_string())
    }
}

/// A solved, enriched route ready to publish
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub response: OptimizeRouteResponse,
    /// Session-grade itinerary entries
    pub planned: Vec<PlannedStop>,
    pub algorithm: &'static str,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_stops: usize,
    pub solver: SolverConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_stops: DEFAULT_MAX_STOPS,
            solver: SolverConfig::default(),
        }
    }
}

/// Optimization pipeline
pub struct OptimizationPipeline {
    matrix: Arc<dyn MatrixProvider>,
    config: PipelineConfig,
}

impl OptimizationPipeline {
    pub fn new(matrix: Arc<dyn MatrixProvider>, config: PipelineConfig) -> Self {
        Self { matrix, config }
    }

    /// Optimize the request. `current_position`, when given, displaces the
    /// origin (re-routing path) and relaxes the two-stop minimum that the
    /// public endpoint carries.
    pub async fn optimize(
        &self,
        request: &OptimizeRouteRequest,
        current_position: Option<Coordinates>,
    ) -> Result<RoutePlan, OptimizeError> {
        let stops = self.validate(request, current_position)?;

        let origin = current_position.unwrap_or(request.driver_location);
        let problem = SolverProblem::new(origin, stops, request.departure_time);

        let locations = problem.locations();
        let matrix = self.matrix.fetch(&locations, request.departure_time).await?;

        if matrix.size != locations.len() || !matrix.is_well_formed() {
            return Err(OptimizeError::UpstreamUnavailable(format!(
                "provider returned a malformed {}-location matrix for {} locations",
                matrix.size,
                locations.len()
            )));
        }

        // Solving is CPU-bound and runs off the I/O workers
        let solver_config = self.config.solver.clone();
        let solve_problem = problem.clone();
        let solve_matrix = matrix.clone();
        let solved = tokio::task::spawn_blocking(move || {
            VrpSolver::new(solver_config).solve(&solve_problem, &solve_matrix)
        })
        .await
        .map_err(|e| OptimizeError::Internal(format!("solver task failed: {}", e)))?
        .map_err(|SolveError::Infeasible(message)| OptimizeError::NoFeasibleRoute(message))?;

        let response = builder::build_response(&request.driver_id, &problem, &matrix, &solved);
        let planned = builder::planned_stops(&problem, &solved);

        info!(
            "Route optimized for {}: {} stops, {:.1} km, {} min, score {:.2} ({})",
            request.driver_id,
            response.optimized_stops.len(),
            response.total_distance_km,
            response.total_duration_minutes,
            response.optimization_score,
            solved.algorithm,
        );

        Ok(RoutePlan {
            response,
            planned,
            algorithm: solved.algorithm,
        })
    }

    fn validate(
        &self,
        request: &OptimizeRouteRequest,
        current_position: Option<Coordinates>,
    ) -> Result<Vec<Stop>, OptimizeError> {
        let fail = |message: String| Err(OptimizeError::Validation(message));

        if !is_valid_opaque_id(&request.driver_id) {
            return fail(format!("driver_id '{}' is not a valid token", request.driver_id));
        }
        if !request.driver_location.is_valid() {
            return fail("driver_location is out of range".to_string());
        }
        if let Some(position) = current_position {
            if !position.is_valid() {
                return fail("current position is out of range".to_string());
            }
        }

        let age_secs = (chrono::Utc::now() - request.departure_time).num_seconds();
        if age_secs > PAST_DEPARTURE_GRACE_SECS {
            return fail("departure_time is in the past".to_string());
        }

        // The public endpoint takes 2..=max stops; reroutes over a live
        // position legitimately run down to a single remaining stop.
        let min_stops = if current_position.is_some() { 1 } else { 2 };
        if request.stops.len() < min_stops {
            return fail(format!(
                "at least {} stops required, got {}",
                min_stops,
                request.stops.len()
            ));
        }
        if request.stops.len() > self.config.max_stops {
            return fail(format!(
                "at most {} stops allowed, got {}",
                self.config.max_stops,
                request.stops.len()
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut stops = Vec::with_capacity(request.stops.len());

        for raw in &request.stops {
            if !is_valid_opaque_id(&raw.stop_id) {
                return fail(format!("stop_id '{}' is not a valid token", raw.stop_id));
            }
            if !seen.insert(raw.stop_id.as_str()) {
                return fail(format!("stop_id '{}' appears more than once", raw.stop_id));
            }
            if !raw.location.is_valid() {
                return fail(format!("stop '{}' location is out of range", raw.stop_id));
            }
            if !(MIN_SERVICE_MINUTES..=MAX_SERVICE_MINUTES).contains(&raw.service_time_minutes) {
                return fail(format!(
                    "stop '{}' service time must be {}-{} minutes",
                    raw.stop_id, MIN_SERVICE_MINUTES, MAX_SERVICE_MINUTES
                ));
            }

            let window = match TimeWindow::parse(&raw.earliest_pickup, &raw.latest_pickup) {
                Ok(Some(window)) => window,
                Ok(None) => {
                    return fail(format!(
                        "stop '{}' window must open before it closes",
                        raw.stop_id
                    ))
                }
                Err(e) => return fail(format!("stop '{}': {}", raw.stop_id, e)),
            };

            stops.push(Stop {
                stop_id: raw.stop_id.clone(),
                location: raw.location,
                window,
                service_minutes: raw.service_time_minutes,
            });
        }

        Ok(stops)
    }
}
