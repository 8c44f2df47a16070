//! Session lifecycle handler
//!
//! Dispatcher-facing shift end: drops the driver session and its ingest
//! queue. TTL expiry covers drivers that simply go dark.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::services::fanout::SessionManager;
use crate::services::ingest::IngestWorker;
use crate::services::session_store::SessionStore;
use crate::types::messages::{error_codes, ErrorResponse, Request, SuccessResponse};
use crate::types::session::StopChange;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClearRequest {
    pub driver_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopsChangedRequest {
    pub driver_id: String,
    pub change: StopChange,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopsChangedAck {
    pub driver_id: String,
    pub flagged: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClearAck {
    pub driver_id: String,
    pub cleared: bool,
}

/// Handle shift-end requests
pub async fn handle_clear(
    client: Client,
    mut subscriber: Subscriber,
    sessions: Arc<SessionStore>,
    ingest: Arc<IngestWorker>,
    manager: Arc<SessionManager>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<SessionClearRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse session clear request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), error_codes::INVALID_REQUEST, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let driver_id = request.payload.driver_id;
        info!("Clearing session for {} (shift end)", driver_id);

        ingest.remove_driver(&driver_id);
        manager.disconnect(&driver_id).await;

        match sessions.clear(&driver_id).await {
            Ok(()) => {
                let ack = SessionClearAck {
                    driver_id,
                    cleared: true,
                };
                let response = SuccessResponse::new(request.id, ack);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, error_codes::INTERNAL_ERROR, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle dispatcher roster-change notices. The flag is picked up by the
/// delay detector on the driver's next event and is never suppressed by
/// the reroute quiet interval.
pub async fn handle_stops_changed(
    client: Client,
    mut subscriber: Subscriber,
    sessions: Arc<SessionStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<StopsChangedRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse stops-changed request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), error_codes::INVALID_REQUEST, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let driver_id = request.payload.driver_id;
        info!("Stops changed for {} ({:?})", driver_id, request.payload.change);

        match sessions.flag_stops_changed(&driver_id, request.payload.change).await {
            Ok(Some(_)) => {
                let ack = StopsChangedAck {
                    driver_id,
                    flagged: true,
                };
                let response = SuccessResponse::new(request.id, ack);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    error_codes::VALIDATION_ERROR,
                    format!("no session for driver '{}'", driver_id),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, error_codes::INTERNAL_ERROR, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
