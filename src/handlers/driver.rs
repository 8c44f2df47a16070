//! Driver channel bridge
//!
//! The gateway terminates the actual WebSocket and speaks plain subjects
//! to the worker: a connect request per driver, inbound frames on
//! `medway.driver.{id}.in`, outbound frames on `medway.driver.{id}.out`,
//! and a `.closed` notice when the worker drops the channel.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::fanout::{DriverChannel, SessionManager};
use crate::types::frames::OutboundFrame;
use crate::types::messages::{error_codes, ErrorResponse, Request, SuccessResponse};

pub fn driver_in_subject(driver_id: &str) -> String {
    format!("medway.driver.{}.in", driver_id)
}

pub fn driver_out_subject(driver_id: &str) -> String {
    format!("medway.driver.{}.out", driver_id)
}

pub fn driver_closed_subject(driver_id: &str) -> String {
    format!("medway.driver.{}.closed", driver_id)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverConnectRequest {
    pub driver_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverConnectAck {
    pub driver_id: String,
    pub status: String,
}

/// Outbound half of the bridge: frames become subject publications
struct NatsDriverChannel {
    client: Client,
    driver_id: String,
    cancel: CancellationToken,
}

#[async_trait]
impl DriverChannel for NatsDriverChannel {
    async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let payload = serde_json::to_vec(&frame)?;
        self.client
            .publish(driver_out_subject(&self.driver_id), payload.into())
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .client
            .publish(driver_closed_subject(&self.driver_id), "{}".into())
            .await;
    }
}

/// Handle driver connect requests
pub async fn handle_connect(
    client: Client,
    mut subscriber: Subscriber,
    manager: Arc<SessionManager>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Connect message without reply subject");
                continue;
            }
        };

        let request: Request<DriverConnectRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse connect request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), error_codes::INVALID_REQUEST, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let driver_id = request.payload.driver_id.clone();
        match register_driver(&client, &manager, &driver_id).await {
            Ok(()) => {
                let ack = DriverConnectAck {
                    driver_id,
                    status: "connected".to_string(),
                };
                let response = SuccessResponse::new(request.id, ack);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                warn!("Connect failed for {}: {}", driver_id, e);
                let error = ErrorResponse::new(request.id, error_codes::VALIDATION_ERROR, e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

async fn register_driver(
    client: &Client,
    manager: &Arc<SessionManager>,
    driver_id: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let channel = Arc::new(NatsDriverChannel {
        client: client.clone(),
        driver_id: driver_id.to_string(),
        cancel: cancel.clone(),
    });

    // Inbound frames flow for as long as the channel is registered; the
    // manager cancels the token when it closes or replaces the channel
    let mut inbound = client.subscribe(driver_in_subject(driver_id)).await?;
    {
        let manager = manager.clone();
        let driver_id = driver_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = inbound.next() => match msg {
                        Some(msg) => {
                            match std::str::from_utf8(&msg.payload) {
                                Ok(raw) => manager.handle_frame(&driver_id, raw).await,
                                Err(_) => debug!("Non-UTF8 frame from {}", driver_id),
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("Inbound bridge stopped for {}", driver_id);
        });
    }

    if let Err(e) = manager.connect(driver_id, channel.clone()).await {
        // Tear the inbound bridge down again; nothing was registered
        channel.close().await;
        return Err(e);
    }
    info!("Driver channel bridged for {}", driver_id);
    Ok(())
}

/// Handle driver disconnect requests
pub async fn handle_disconnect(
    client: Client,
    mut subscriber: Subscriber,
    manager: Arc<SessionManager>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let request: Request<DriverConnectRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse disconnect request: {}", e);
                continue;
            }
        };

        manager.disconnect(&request.payload.driver_id).await;

        if let Some(reply) = msg.reply {
            let ack = DriverConnectAck {
                driver_id: request.payload.driver_id,
                status: "disconnected".to_string(),
            };
            let response = SuccessResponse::new(request.id, ack);
            let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
        }
    }

    Ok(())
}
