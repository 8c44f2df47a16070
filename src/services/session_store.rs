//! Driver session store
//!
//! A thin façade over the session KV bucket. Every write re-puts the full
//! record, which refreshes the bucket TTL. Callers serialise per driver
//! (the ingest worker's queues); the store itself is just persistence.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::services::kv::KvStore;
use crate::types::geo::Coordinates;
use crate::types::session::{DriverSession, GpsFix, PlannedStop, SessionStatus, StopChange};

/// Result of applying a stop completion
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Head matched; session advanced
    Completed(DriverSession),
    /// The identifier is not the current head; session untouched
    UnknownStop,
    NoSession,
}

pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn save(&self, session: &DriverSession) -> Result<()> {
        let bytes = serde_json::to_vec(session).context("Failed to serialize session")?;
        self.kv.put(&session.driver_id, bytes).await?;
        debug!("Session saved for {}", session.driver_id);
        Ok(())
    }

    pub async fn get(&self, driver_id: &str) -> Result<Option<DriverSession>> {
        match self.kv.get(driver_id).await? {
            Some(bytes) => {
                let session = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt session record for '{}'", driver_id))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Update only the last-GPS field, refreshing the TTL
    pub async fn update_gps(
        &self,
        driver_id: &str,
        location: Coordinates,
        at: DateTime<Utc>,
    ) -> Result<Option<DriverSession>> {
        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(None);
        };
        session.last_gps = Some(GpsFix { location, at });
        if session.status == SessionStatus::Idle {
            session.status = SessionStatus::Active;
        }
        self.save(&session).await?;
        Ok(Some(session))
    }

    /// Apply a completion of the current head stop
    pub async fn mark_completed(
        &self,
        driver_id: &str,
        stop_id: &str,
    ) -> Result<CompletionOutcome> {
        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(CompletionOutcome::NoSession);
        };

        if !session.complete_head(stop_id) {
            return Ok(CompletionOutcome::UnknownStop);
        }

        self.save(&session).await?;
        Ok(CompletionOutcome::Completed(session))
    }

    /// Replace the route, baseline and reroute timestamp together
    pub async fn record_reroute(
        &self,
        driver_id: &str,
        route: Vec<PlannedStop>,
        baseline_minutes: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<DriverSession>> {
        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(None);
        };
        session.route = route;
        session.baseline_remaining_minutes = baseline_minutes;
        session.last_reroute_at = Some(at);
        session.stops_changed = None;
        session.reroute_failures = 0;
        self.save(&session).await?;
        Ok(Some(session))
    }

    /// Flag an out-of-band roster change; the next driver event triggers
    /// the reroute that consumes it
    pub async fn flag_stops_changed(
        &self,
        driver_id: &str,
        change: StopChange,
    ) -> Result<Option<DriverSession>> {
        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(None);
        };
        session.stops_changed = Some(change);
        self.save(&session).await?;
        Ok(Some(session))
    }

    pub async fn clear(&self, driver_id: &str) -> Result<()> {
        self.kv.delete(driver_id).await
    }

    /// Reachability check for the health probe
    pub async fn ping(&self) -> Result<()> {
        self.kv.ping().await
    }
}
