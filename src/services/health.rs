//! Health probe
//!
//! Reachability of the state backend plus presence of the traffic
//! provider credential. The paid provider is never called from here.

use serde::{Deserialize, Serialize};

use crate::services::session_store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state_backend: String,
    pub maps_api: String,
}

pub async fn probe(sessions: &SessionStore, maps_configured: bool) -> HealthReport {
    let backend_reachable = sessions.ping().await.is_ok();

    let status = match (backend_reachable, maps_configured) {
        (true, true) => HealthStatus::Healthy,
        (false, true) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };

    HealthReport {
        status,
        state_backend: if backend_reachable {
            "reachable".to_string()
        } else {
            "unreachable".to_string()
        },
        maps_api: if maps_configured {
            "configured".to_string()
        } else {
            "not_configured".to_string()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryKvStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn store(available: bool) -> (SessionStore, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new(Duration::from_secs(60)));
        kv.set_available(available);
        (SessionStore::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn test_healthy_when_backend_and_key_present() {
        let (sessions, _) = store(true);
        let report = probe(&sessions, true).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.state_backend, "reachable");
        assert_eq!(report.maps_api, "configured");
    }

    #[tokio::test]
    async fn test_degraded_without_backend() {
        let (sessions, _) = store(false);
        let report = probe(&sessions, true).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.state_backend, "unreachable");
    }

    #[tokio::test]
    async fn test_unhealthy_without_key() {
        let (sessions, _) = store(true);
        assert_eq!(probe(&sessions, false).await.status, HealthStatus::Unhealthy);

        let (sessions, _) = store(false);
        assert_eq!(probe(&sessions, false).await.status, HealthStatus::Unhealthy);
    }
}
