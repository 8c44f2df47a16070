//! Ingest worker
//!
//! GPS fixes and stop completions land here. Each driver gets a
//! single-consumer queue so state mutation, delay detection and reroute
//! publication never interleave for one driver; across drivers everything
//! runs concurrently. Plain GPS fixes coalesce on a bounded queue with the
//! newest winning; completions are never dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::services::delay::{self, DelaySignals, DelayThresholds, RerouteDecision};
use crate::services::matrix::MatrixProvider;
use crate::services::pipeline::OptimizationPipeline;
use crate::services::session_store::{CompletionOutcome, SessionStore};
use crate::services::solver::{walk_unchecked, SolverProblem};
use crate::services::topics::UpdatePublisher;
use crate::types::api::OptimizeRouteRequest;
use crate::types::frames::RouteUpdated;
use crate::types::geo::Coordinates;
use crate::types::session::DriverSession;
use crate::types::stop::PickupStop;
use crate::types::time::minutes_to_time_str;

/// Plain GPS fixes queued per driver before coalescing kicks in
const GPS_QUEUE_DEPTH: usize = 3;

/// One driver event, already validated by the session manager
#[derive(Debug, Clone)]
pub struct DriverEvent {
    pub location: Coordinates,
    pub at: DateTime<Utc>,
    pub completed_stop_id: Option<String>,
}

impl DriverEvent {
    fn is_plain_gps(&self) -> bool {
        self.completed_stop_id.is_none()
    }
}

struct DriverQueue {
    pending: Arc<Mutex<VecDeque<DriverEvent>>>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

struct IngestInner {
    sessions: Arc<SessionStore>,
    pipeline: Arc<OptimizationPipeline>,
    matrix: Arc<dyn MatrixProvider>,
    publisher: Arc<dyn UpdatePublisher>,
    thresholds: DelayThresholds,
}

/// Ingest worker with per-driver serialisation
pub struct IngestWorker {
    inner: Arc<IngestInner>,
    queues: Mutex<HashMap<String, DriverQueue>>,
}

impl IngestWorker {
    pub fn new(
        sessions: Arc<SessionStore>,
        pipeline: Arc<OptimizationPipeline>,
        matrix: Arc<dyn MatrixProvider>,
        publisher: Arc<dyn UpdatePublisher>,
        thresholds: DelayThresholds,
    ) -> Self {
        Self {
            inner: Arc::new(IngestInner {
                sessions,
                pipeline,
                matrix,
                publisher,
                thresholds,
            }),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an event onto the driver's consumer, spawning it on first use
    pub fn enqueue(&self, driver_id: &str, event: DriverEvent) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(driver_id.to_string()).or_insert_with(|| {
            let pending: Arc<Mutex<VecDeque<DriverEvent>>> = Arc::new(Mutex::new(VecDeque::new()));
            let notify = Arc::new(Notify::new());
            let task = tokio::spawn(run_driver_queue(
                self.inner.clone(),
                driver_id.to_string(),
                pending.clone(),
                notify.clone(),
            ));
            DriverQueue {
                pending,
                notify,
                task,
            }
        });

        push_event(&mut queue.pending.lock(), event);
        queue.notify.notify_one();
    }

    /// Drop a driver's consumer (shift end)
    pub fn remove_driver(&self, driver_id: &str) {
        if let Some(queue) = self.queues.lock().remove(driver_id) {
            queue.task.abort();
        }
    }

    /// Process one event inline. Used by the queue consumers; exposed so
    /// tests can drive the worker synchronously.
    pub async fn process_event(&self, driver_id: &str, event: DriverEvent) {
        self.inner.process_event(driver_id, event).await;
    }
}

/// Bounded push: plain GPS coalesces (newest wins), completions always keep
fn push_event(pending: &mut VecDeque<DriverEvent>, event: DriverEvent) {
    if event.is_plain_gps() {
        let plain_count = pending.iter().filter(|e| e.is_plain_gps()).count();
        if plain_count >= GPS_QUEUE_DEPTH {
            if let Some(oldest) = pending.iter().position(|e| e.is_plain_gps()) {
                pending.remove(oldest);
            }
        }
    }
    pending.push_back(event);
}

async fn run_driver_queue(
    inner: Arc<IngestInner>,
    driver_id: String,
    pending: Arc<Mutex<VecDeque<DriverEvent>>>,
    notify: Arc<Notify>,
) {
    loop {
        let event = pending.lock().pop_front();
        match event {
            Some(event) => inner.process_event(&driver_id, event).await,
            None => notify.notified().await,
        }
    }
}

impl IngestInner {
    async fn process_event(&self, driver_id: &str, event: DriverEvent) {
        let session = match self.sessions.update_gps(driver_id, event.location, event.at).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!("Discarding event for unknown driver '{}'", driver_id);
                return;
            }
            Err(e) => {
                warn!("Session read failed for '{}', event deferred: {}", driver_id, e);
                return;
            }
        };

        let session = match &event.completed_stop_id {
            Some(stop_id) => match self.sessions.mark_completed(driver_id, stop_id).await {
                Ok(CompletionOutcome::Completed(session)) => {
                    info!("Driver {} completed stop {}", driver_id, stop_id);
                    session
                }
                Ok(CompletionOutcome::UnknownStop) => {
                    warn!(
                        "Driver {} reported completion of '{}' which is not the current head",
                        driver_id, stop_id
                    );
                    session
                }
                Ok(CompletionOutcome::NoSession) => return,
                Err(e) => {
                    warn!("Completion failed for '{}': {}", driver_id, e);
                    session
                }
            },
            None => session,
        };

        if session.route.is_empty() {
            debug!("Driver {} has no remaining stops", driver_id);
            return;
        }

        let signals = match self.derive_signals(&session, &event).await {
            Some(signals) => signals,
            // Projection needs a matrix; without one the stored route
            // stays authoritative until the next event
            None => return,
        };

        match delay::decide(&signals, &self.thresholds) {
            RerouteDecision::Stay => {}
            RerouteDecision::Reroute(reason) => {
                self.reroute(driver_id, &session, &event, reason).await;
            }
        }
    }

    /// Re-project the remaining schedule from the GPS fix
    async fn derive_signals(
        &self,
        session: &DriverSession,
        event: &DriverEvent,
    ) -> Option<DelaySignals> {
        let remaining = session.remaining_stops();
        let problem = SolverProblem::new(event.location, remaining, event.at);
        let locations = problem.locations();

        let matrix = match self.matrix.fetch(&locations, event.at).await {
            Ok(matrix) if matrix.size == locations.len() => matrix,
            Ok(_) => {
                warn!("Projection matrix has wrong shape for {}", session.driver_id);
                return None;
            }
            Err(e) => {
                warn!("Projection matrix fetch failed for {}: {}", session.driver_id, e);
                return None;
            }
        };

        let identity: Vec<usize> = (0..problem.stops.len()).collect();
        let projected = walk_unchecked(&problem, &matrix, &identity);

        let schedule_delay_minutes = projected
            .legs
            .first()
            .zip(session.head())
            .map(|(leg, head)| (leg.arrival_second / 60) as i64 - head.arrival_minute as i64)
            .unwrap_or(0);

        let remaining_duration_minutes =
            (projected.total_travel_seconds + projected.total_service_seconds + 30) / 60;

        Some(DelaySignals {
            schedule_delay_minutes,
            remaining_duration_minutes,
            baseline_remaining_minutes: session.baseline_remaining_minutes,
            stops_changed: session.stops_changed,
            seconds_since_last_reroute: session
                .last_reroute_at
                .map(|at| (event.at - at).num_seconds()),
        })
    }

    /// Re-optimise the remaining stops from the live position and publish.
    /// A pipeline error leaves the stored route authoritative.
    async fn reroute(
        &self,
        driver_id: &str,
        session: &DriverSession,
        event: &DriverEvent,
        reason: crate::types::frames::RerouteReason,
    ) {
        info!("Rerouting driver {} ({:?})", driver_id, reason);

        let request = OptimizeRouteRequest {
            driver_id: driver_id.to_string(),
            driver_location: event.location,
            departure_time: event.at,
            stops: session
                .route
                .iter()
                .map(|planned| PickupStop {
                    stop_id: planned.stop_id.clone(),
                    location: planned.location,
                    earliest_pickup: minutes_to_time_str(planned.window.earliest),
                    latest_pickup: minutes_to_time_str(planned.window.latest),
                    service_time_minutes: planned.service_minutes,
                })
                .collect(),
        };

        let plan = match self.pipeline.optimize(&request, Some(event.location)).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Reroute optimization failed for {}: {}", driver_id, e);
                self.record_failure(driver_id).await;
                return;
            }
        };

        let baseline = plan.response.total_duration_minutes;
        match self
            .sessions
            .record_reroute(driver_id, plan.planned, baseline, event.at)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Session for {} vanished while rerouting", driver_id);
                return;
            }
            Err(e) => {
                warn!("Failed to record reroute for {}: {}", driver_id, e);
                return;
            }
        }

        let update = RouteUpdated {
            reason,
            optimized_stops: plan.response.optimized_stops,
            total_duration_minutes: plan.response.total_duration_minutes,
            google_maps_url: plan.response.google_maps_url,
        };

        if let Err(e) = self.publisher.publish(driver_id, &update).await {
            warn!("Failed to publish route update for {}: {}", driver_id, e);
        }
    }

    async fn record_failure(&self, driver_id: &str) {
        match self.sessions.get(driver_id).await {
            Ok(Some(mut session)) => {
                session.reroute_failures += 1;
                if let Err(e) = self.sessions.save(&session).await {
                    warn!("Failed to persist failure counter for {}: {}", driver_id, e);
                }
            }
            _ => warn!("Could not record reroute failure for {}", driver_id),
        }
    }
}
