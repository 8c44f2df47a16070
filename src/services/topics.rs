//! Per-driver reroute topics
//!
//! Route updates fan out through one subject per driver. The ingest worker
//! publishes; each live session subscribes for the lifetime of its
//! channel. The in-memory broker backs tests and mirrors NATS semantics
//! (no receivers means the message is simply gone).

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::types::frames::RouteUpdated;

/// Subject carrying `route_updated` envelopes for one driver
pub fn reroute_subject(driver_id: &str) -> String {
    format!("reroute.{}", driver_id)
}

#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, driver_id: &str, update: &RouteUpdated) -> Result<()>;
}

#[async_trait]
pub trait UpdateSubscriber: Send + Sync {
    /// Subscribe to a driver's updates; the stream ends when the
    /// subscription is dropped server-side
    async fn subscribe(&self, driver_id: &str) -> Result<BoxStream<'static, RouteUpdated>>;
}

/// NATS-backed topics
pub struct NatsTopics {
    client: async_nats::Client,
}

impl NatsTopics {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpdatePublisher for NatsTopics {
    async fn publish(&self, driver_id: &str, update: &RouteUpdated) -> Result<()> {
        let payload = serde_json::to_vec(update).context("Failed to serialize route update")?;
        self.client
            .publish(reroute_subject(driver_id), payload.into())
            .await
            .context("Failed to publish route update")?;
        Ok(())
    }
}

#[async_trait]
impl UpdateSubscriber for NatsTopics {
    async fn subscribe(&self, driver_id: &str) -> Result<BoxStream<'static, RouteUpdated>> {
        let subscriber = self
            .client
            .subscribe(reroute_subject(driver_id))
            .await
            .context("Failed to subscribe to reroute topic")?;

        Ok(subscriber
            .filter_map(|message| async move {
                serde_json::from_slice::<RouteUpdated>(&message.payload).ok()
            })
            .boxed())
    }
}

/// Process-local broker for tests
pub struct MemoryTopics {
    channels: Mutex<HashMap<String, broadcast::Sender<RouteUpdated>>>,
    published: Mutex<Vec<(String, RouteUpdated)>>,
}

impl MemoryTopics {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    fn sender(&self, driver_id: &str) -> broadcast::Sender<RouteUpdated> {
        self.channels
            .lock()
            .entry(driver_id.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }

    /// Everything published so far, in order
    pub fn published(&self) -> Vec<(String, RouteUpdated)> {
        self.published.lock().clone()
    }

    pub fn published_for(&self, driver_id: &str) -> Vec<RouteUpdated> {
        self.published
            .lock()
            .iter()
            .filter(|(id, _)| id == driver_id)
            .map(|(_, update)| update.clone())
            .collect()
    }
}

impl Default for MemoryTopics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdatePublisher for MemoryTopics {
    async fn publish(&self, driver_id: &str, update: &RouteUpdated) -> Result<()> {
        self.published
            .lock()
            .push((driver_id.to_string(), update.clone()));
        // No subscriber is not an error, matching NATS
        let _ = self.sender(driver_id).send(update.clone());
        Ok(())
    }
}

#[async_trait]
impl UpdateSubscriber for MemoryTopics {
    async fn subscribe(&self, driver_id: &str) -> Result<BoxStream<'static, RouteUpdated>> {
        let receiver = self.sender(driver_id).subscribe();

        Ok(stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(update) => return Some((update, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}
