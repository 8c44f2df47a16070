//! Health endpoint handler

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::debug;

use crate::services::health;
use crate::services::session_store::SessionStore;

/// Handle health probe requests
pub async fn handle_health(
    client: Client,
    mut subscriber: Subscriber,
    sessions: Arc<SessionStore>,
    maps_configured: bool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received health probe");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let report = health::probe(&sessions, maps_configured).await;
        let _ = client
            .publish(reply, serde_json::to_vec(&report)?.into())
            .await;
    }

    Ok(())
}
