//! Route optimization handler
//!
//! Serves `medway.route.optimize`. On success the baseline route is also
//! captured into the driver session so live tracking starts from the
//! published itinerary.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::pipeline::OptimizationPipeline;
use crate::services::session_store::SessionStore;
use crate::types::api::OptimizeRouteRequest;
use crate::types::messages::{error_codes, ErrorResponse, Request, SuccessResponse};
use crate::types::session::{DriverSession, SessionStatus};

/// Handle route optimization requests
pub async fn handle_optimize(
    client: Client,
    mut subscriber: Subscriber,
    pipeline: Arc<OptimizationPipeline>,
    sessions: Arc<SessionStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Optimize message without reply subject");
                continue;
            }
        };

        let request: Request<OptimizeRouteRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse optimize request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), error_codes::INVALID_REQUEST, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        info!(
            "Optimizing route for {} with {} stops",
            request.payload.driver_id,
            request.payload.stops.len()
        );

        match pipeline.optimize(&request.payload, None).await {
            Ok(plan) => {
                // Capture the baseline into the session; a state outage
                // degrades tracking but not the response itself
                let mut session = DriverSession::new(&request.payload.driver_id);
                session.route = plan.planned.clone();
                session.baseline_remaining_minutes = plan.response.total_duration_minutes;
                session.status = SessionStatus::Idle;
                if let Err(e) = sessions.save(&session).await {
                    warn!(
                        "Could not capture baseline session for {}: {}",
                        request.payload.driver_id, e
                    );
                }

                let response = SuccessResponse::new(request.id, plan.response);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                warn!("Optimization failed for {}: {}", request.payload.driver_id, e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
