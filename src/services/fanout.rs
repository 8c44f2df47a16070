//! Live session manager and fan-out
//!
//! Holds the registry of connected driver channels. Each connection gets a
//! topic-subscription forwarder and a heartbeat task; inbound frames are
//! validated here and queued to the ingest worker. The transport itself is
//! behind the `DriverChannel` trait so the gateway bridge and tests plug
//! in the same way.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::ingest::{DriverEvent, IngestWorker};
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_store::SessionStore;
use crate::services::topics::UpdateSubscriber;
use crate::types::frames::{ChannelErrorCode, InboundFrame, OutboundFrame};
use crate::types::geo::Coordinates;
use crate::types::stop::is_valid_opaque_id;

/// Outbound half of a live driver connection
#[async_trait]
pub trait DriverChannel: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<()>;

    /// Close the underlying transport
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    /// Inbound frames allowed per driver per minute
    pub max_frames_per_minute: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(30),
            max_frames_per_minute: 120,
        }
    }
}

struct ChannelEntry {
    channel: Arc<dyn DriverChannel>,
    cancel: CancellationToken,
    last_pong: Arc<Mutex<Instant>>,
}

struct FanoutInner {
    registry: Mutex<HashMap<String, ChannelEntry>>,
    subscriber: Arc<dyn UpdateSubscriber>,
    ingest: Arc<IngestWorker>,
    sessions: Arc<SessionStore>,
    limiter: RateLimiter,
    config: SessionManagerConfig,
}

/// Registry and fan-out for live driver channels
pub struct SessionManager {
    inner: Arc<FanoutInner>,
}

impl SessionManager {
    pub fn new(
        subscriber: Arc<dyn UpdateSubscriber>,
        ingest: Arc<IngestWorker>,
        sessions: Arc<SessionStore>,
        config: SessionManagerConfig,
    ) -> Self {
        let limiter = RateLimiter::new(config.max_frames_per_minute, 60);
        Self {
            inner: Arc::new(FanoutInner {
                registry: Mutex::new(HashMap::new()),
                subscriber,
                ingest,
                sessions,
                limiter,
                config,
            }),
        }
    }

    /// Register a channel for the driver. Any prior channel is closed and
    /// replaced; its subscription and heartbeat die with it.
    pub async fn connect(&self, driver_id: &str, channel: Arc<dyn DriverChannel>) -> Result<()> {
        if !is_valid_opaque_id(driver_id) {
            anyhow::bail!("driver id '{}' is not a valid token", driver_id);
        }

        let previous = self.inner.registry.lock().remove(driver_id);
        if let Some(previous) = previous {
            info!("Replacing existing channel for {}", driver_id);
            previous.cancel.cancel();
            previous.channel.close().await;
        }

        let stream = self.inner.subscriber.subscribe(driver_id).await?;
        let cancel = CancellationToken::new();
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        // Topic forwarder: reroute publications become route_updated frames
        {
            let driver_id = driver_id.to_string();
            let channel = channel.clone();
            let cancel = cancel.clone();
            let inner = Arc::downgrade(&self.inner);
            let mut stream = stream;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        update = stream.next() => match update {
                            Some(update) => {
                                if channel.send(OutboundFrame::RouteUpdated(update)).await.is_err() {
                                    warn!("Channel send failed for {}, disconnecting", driver_id);
                                    disconnect_weak(&inner, &driver_id).await;
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                debug!("Forwarder stopped for {}", driver_id);
            });
        }

        // Heartbeat: ping every interval, drop the channel on a missed pong
        {
            let driver_id = driver_id.to_string();
            let channel = channel.clone();
            let cancel = cancel.clone();
            let last_pong = last_pong.clone();
            let inner = Arc::downgrade(&self.inner);
            let interval = self.inner.config.heartbeat_interval;
            let pong_timeout = self.inner.config.pong_timeout;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }

                    let ping_sent = Instant::now();
                    let frame = OutboundFrame::Ping {
                        server_time: Utc::now(),
                    };
                    if channel.send(frame).await.is_err() {
                        disconnect_weak(&inner, &driver_id).await;
                        break;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(pong_timeout) => {}
                    }

                    if *last_pong.lock() < ping_sent {
                        warn!("Driver {} missed heartbeat, closing channel", driver_id);
                        disconnect_weak(&inner, &driver_id).await;
                        break;
                    }
                }
                debug!("Heartbeat stopped for {}", driver_id);
            });
        }

        self.inner.registry.lock().insert(
            driver_id.to_string(),
            ChannelEntry {
                channel,
                cancel,
                last_pong,
            },
        );

        info!("Driver {} connected", driver_id);
        Ok(())
    }

    /// Validate an inbound frame and hand it to the ingest worker. Frame
    /// problems go back as error frames; the connection survives them.
    pub async fn handle_frame(&self, driver_id: &str, raw: &str) {
        let Some(channel) = self.channel_for(driver_id) else {
            debug!("Frame from unregistered driver {}", driver_id);
            return;
        };

        let frame: InboundFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.send_error(
                    &channel,
                    driver_id,
                    ChannelErrorCode::InvalidGps,
                    format!("malformed frame: {}", e),
                )
                .await;
                return;
            }
        };

        match frame {
            InboundFrame::Pong => {
                if let Some(entry) = self.inner.registry.lock().get(driver_id) {
                    *entry.last_pong.lock() = Instant::now();
                }
            }
            InboundFrame::GpsUpdate {
                lat,
                lng,
                timestamp,
                completed_stop_id,
            } => {
                // Plain GPS chatter is throttled; pongs and completions
                // must never be dropped, so frames carrying a completion
                // bypass the limiter entirely
                if completed_stop_id.is_none() && !self.inner.limiter.check_and_record(driver_id) {
                    self.send_error(
                        &channel,
                        driver_id,
                        ChannelErrorCode::RateLimited,
                        "too many position updates, slow down".to_string(),
                    )
                    .await;
                    return;
                }

                let location = Coordinates::new(lat, lng);
                if !location.is_valid() {
                    self.send_error(
                        &channel,
                        driver_id,
                        ChannelErrorCode::InvalidGps,
                        format!("coordinates ({}, {}) are out of range", lat, lng),
                    )
                    .await;
                    return;
                }

                let session = match self.inner.sessions.get(driver_id).await {
                    Ok(Some(session)) => session,
                    Ok(None) => {
                        self.send_error(
                            &channel,
                            driver_id,
                            ChannelErrorCode::DriverNotFound,
                            "no active session for this driver".to_string(),
                        )
                        .await;
                        return;
                    }
                    Err(e) => {
                        warn!("Session read failed for {}: {}", driver_id, e);
                        self.send_error(
                            &channel,
                            driver_id,
                            ChannelErrorCode::OptimizationFailed,
                            "session state temporarily unavailable".to_string(),
                        )
                        .await;
                        return;
                    }
                };

                // Completion pre-check so the driver hears about a bad id
                // right away; the ingest worker re-validates under the
                // per-driver queue before mutating anything.
                let completed_stop_id = match completed_stop_id {
                    Some(stop_id) => {
                        let head_matches = session
                            .head()
                            .map(|head| head.stop_id == stop_id)
                            .unwrap_or(false);
                        if !is_valid_opaque_id(&stop_id) || !head_matches {
                            self.send_error(
                                &channel,
                                driver_id,
                                ChannelErrorCode::InvalidStopId,
                                format!("'{}' is not the current head stop", stop_id),
                            )
                            .await;
                            None
                        } else {
                            Some(stop_id)
                        }
                    }
                    None => None,
                };

                self.inner.ingest.enqueue(
                    driver_id,
                    DriverEvent {
                        location,
                        at: timestamp,
                        completed_stop_id,
                    },
                );
            }
        }
    }

    /// Remove the channel; the session record persists for reconnection
    pub async fn disconnect(&self, driver_id: &str) {
        disconnect_inner(&self.inner, driver_id).await;
    }

    pub fn is_connected(&self, driver_id: &str) -> bool {
        self.inner.registry.lock().contains_key(driver_id)
    }

    fn channel_for(&self, driver_id: &str) -> Option<Arc<dyn DriverChannel>> {
        self.inner
            .registry
            .lock()
            .get(driver_id)
            .map(|entry| entry.channel.clone())
    }

    async fn send_error(
        &self,
        channel: &Arc<dyn DriverChannel>,
        driver_id: &str,
        code: ChannelErrorCode,
        message: String,
    ) {
        debug!("Error frame to {}: {:?} {}", driver_id, code, message);
        let _ = channel.send(OutboundFrame::Error { code, message }).await;
    }
}

async fn disconnect_weak(inner: &Weak<FanoutInner>, driver_id: &str) {
    if let Some(inner) = inner.upgrade() {
        disconnect_inner(&inner, driver_id).await;
    }
}

async fn disconnect_inner(inner: &Arc<FanoutInner>, driver_id: &str) {
    let entry = inner.registry.lock().remove(driver_id);
    if let Some(entry) = entry {
        entry.cancel.cancel();
        entry.channel.close().await;
        inner.limiter.forget(driver_id);
        info!("Driver {} disconnected", driver_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::delay::DelayThresholds;
    use crate::services::kv::MemoryKvStore;
    use crate::services::matrix::{EstimatedMatrixProvider, MatrixProvider};
    use crate::services::pipeline::{OptimizationPipeline, PipelineConfig};
    use crate::services::solver::SolverConfig;
    use crate::services::topics::{MemoryTopics, UpdatePublisher};
    use crate::types::frames::{RerouteReason, RouteUpdated};
    use crate::types::session::{DriverSession, PlannedStop, SessionStatus};
    use crate::types::time::TimeWindow;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockChannel {
        sent: Mutex<Vec<OutboundFrame>>,
        closed: AtomicBool,
    }

    impl MockChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<OutboundFrame> {
            self.sent.lock().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DriverChannel for MockChannel {
        async fn send(&self, frame: OutboundFrame) -> Result<()> {
            if self.is_closed() {
                anyhow::bail!("channel closed");
            }
            self.sent.lock().push(frame);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Fixture {
        manager: SessionManager,
        topics: Arc<MemoryTopics>,
        sessions: Arc<SessionStore>,
    }

    fn fixture(config: SessionManagerConfig) -> Fixture {
        let sessions = Arc::new(SessionStore::new(Arc::new(MemoryKvStore::new(
            Duration::from_secs(3600),
        ))));
        let matrix: Arc<dyn MatrixProvider> = Arc::new(EstimatedMatrixProvider);
        let pipeline = Arc::new(OptimizationPipeline::new(
            matrix.clone(),
            PipelineConfig {
                max_stops: 25,
                solver: SolverConfig::fast(),
            },
        ));
        let topics = Arc::new(MemoryTopics::new());
        let ingest = Arc::new(IngestWorker::new(
            sessions.clone(),
            pipeline,
            matrix,
            topics.clone(),
            DelayThresholds::default(),
        ));
        let manager = SessionManager::new(topics.clone(), ingest, sessions.clone(), config);
        Fixture {
            manager,
            topics,
            sessions,
        }
    }

    fn slow_heartbeat() -> SessionManagerConfig {
        SessionManagerConfig {
            heartbeat_interval: Duration::from_secs(600),
            pong_timeout: Duration::from_secs(30),
            max_frames_per_minute: 120,
        }
    }

    async fn seed_session(sessions: &SessionStore) {
        let mut session = DriverSession::new("drv-1");
        session.status = SessionStatus::Active;
        session.baseline_remaining_minutes = 60;
        session.route = vec![PlannedStop {
            stop_id: "stop-1".to_string(),
            location: Coordinates::new(40.72, -74.00),
            window: TimeWindow::new(1, 1438).unwrap(),
            service_minutes: 5,
            sequence: 1,
            arrival_minute: 1200,
            departure_minute: 1205,
        }];
        sessions.save(&session).await.unwrap();
    }

    fn gps_frame() -> String {
        format!(
            r#"{{"type":"gps_update","lat":40.71,"lng":-74.0,"timestamp":"{}"}}"#,
            Utc::now().to_rfc3339()
        )
    }

    #[tokio::test]
    async fn test_topic_publication_is_forwarded() {
        let f = fixture(slow_heartbeat());
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        let update = RouteUpdated {
            reason: RerouteReason::TrafficDelay,
            optimized_stops: vec![],
            total_duration_minutes: 33,
            google_maps_url: "https://www.google.com/maps/dir/".to_string(),
        };
        f.topics.publish("drv-1", &update).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            OutboundFrame::RouteUpdated(received) => {
                assert_eq!(received.total_duration_minutes, 33)
            }
            other => panic!("expected route_updated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_connection_replaces_prior() {
        let f = fixture(slow_heartbeat());
        let first = MockChannel::new();
        let second = MockChannel::new();

        f.manager.connect("drv-1", first.clone()).await.unwrap();
        f.manager.connect("drv-1", second.clone()).await.unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(f.manager.is_connected("drv-1"));

        // Only the new channel receives publications
        let update = RouteUpdated {
            reason: RerouteReason::StopAdded,
            optimized_stops: vec![],
            total_duration_minutes: 5,
            google_maps_url: String::new(),
        };
        f.topics.publish("drv-1", &update).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(first.sent().is_empty());
        assert_eq!(second.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_gps_frame_reaches_session_state() {
        let f = fixture(slow_heartbeat());
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        f.manager.handle_frame("drv-1", &gps_frame()).await;

        // The ingest queue is asynchronous; poll for the effect
        let mut updated = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if f.sessions
                .get("drv-1")
                .await
                .unwrap()
                .unwrap()
                .last_gps
                .is_some()
            {
                updated = true;
                break;
            }
        }
        assert!(updated, "GPS fix never reached the session");

        // A clean frame produces no error traffic
        assert!(channel
            .sent()
            .iter()
            .all(|frame| !matches!(frame, OutboundFrame::Error { .. })));
    }

    #[tokio::test]
    async fn test_invalid_gps_gets_error_frame() {
        let f = fixture(slow_heartbeat());
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        let frame = format!(
            r#"{{"type":"gps_update","lat":99.0,"lng":-74.0,"timestamp":"{}"}}"#,
            Utc::now().to_rfc3339()
        );
        f.manager.handle_frame("drv-1", &frame).await;

        let sent = channel.sent();
        assert!(sent.iter().any(|frame| matches!(
            frame,
            OutboundFrame::Error {
                code: ChannelErrorCode::InvalidGps,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_malformed_frame_preserves_connection() {
        let f = fixture(slow_heartbeat());
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        f.manager.handle_frame("drv-1", "{not json").await;

        assert!(f.manager.is_connected("drv-1"));
        assert!(channel
            .sent()
            .iter()
            .any(|frame| matches!(frame, OutboundFrame::Error { .. })));
    }

    #[tokio::test]
    async fn test_unknown_driver_gets_driver_not_found() {
        let f = fixture(slow_heartbeat());
        let channel = MockChannel::new();
        f.manager.connect("drv-9", channel.clone()).await.unwrap();

        let frame = format!(
            r#"{{"type":"gps_update","lat":40.7,"lng":-74.0,"timestamp":"{}"}}"#,
            Utc::now().to_rfc3339()
        );
        f.manager.handle_frame("drv-9", &frame).await;

        assert!(channel.sent().iter().any(|frame| matches!(
            frame,
            OutboundFrame::Error {
                code: ChannelErrorCode::DriverNotFound,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_wrong_completion_gets_invalid_stop_id() {
        let f = fixture(slow_heartbeat());
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        let frame = format!(
            r#"{{"type":"gps_update","lat":40.7,"lng":-74.0,"timestamp":"{}","completed_stop_id":"stop-99"}}"#,
            Utc::now().to_rfc3339()
        );
        f.manager.handle_frame("drv-1", &frame).await;

        assert!(channel.sent().iter().any(|frame| matches!(
            frame,
            OutboundFrame::Error {
                code: ChannelErrorCode::InvalidStopId,
                ..
            }
        )));
        // The session itself is untouched
        let session = f.sessions.get("drv-1").await.unwrap().unwrap();
        assert!(session.completed_stop_ids.is_empty());
    }

    #[tokio::test]
    async fn test_missed_heartbeat_closes_channel() {
        let f = fixture(SessionManagerConfig {
            heartbeat_interval: Duration::from_millis(40),
            pong_timeout: Duration::from_millis(40),
            max_frames_per_minute: 120,
        });
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!f.manager.is_connected("drv-1"));
        assert!(channel.is_closed());
        // A ping was sent before the close
        assert!(channel
            .sent()
            .iter()
            .any(|frame| matches!(frame, OutboundFrame::Ping { .. })));
    }

    #[tokio::test]
    async fn test_pong_keeps_channel_alive() {
        let f = fixture(SessionManagerConfig {
            heartbeat_interval: Duration::from_millis(50),
            pong_timeout: Duration::from_millis(100),
            max_frames_per_minute: 1000,
        });
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        // A dutiful client: pong on a tight loop
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            f.manager.handle_frame("drv-1", r#"{"type":"pong"}"#).await;
        }

        assert!(f.manager.is_connected("drv-1"));
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_keeps_session_state() {
        let f = fixture(slow_heartbeat());
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        f.manager.disconnect("drv-1").await;

        assert!(!f.manager.is_connected("drv-1"));
        assert!(channel.is_closed());
        // Session survives for reconnection
        assert!(f.sessions.get("drv-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_flood_is_rate_limited() {
        let f = fixture(SessionManagerConfig {
            heartbeat_interval: Duration::from_secs(600),
            pong_timeout: Duration::from_secs(30),
            max_frames_per_minute: 2,
        });
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        for _ in 0..3 {
            f.manager.handle_frame("drv-1", &gps_frame()).await;
        }

        assert!(channel.sent().iter().any(|frame| matches!(
            frame,
            OutboundFrame::Error {
                code: ChannelErrorCode::RateLimited,
                ..
            }
        )));
        assert!(f.manager.is_connected("drv-1"));
    }

    #[tokio::test]
    async fn test_pong_and_completions_bypass_rate_limit() {
        let f = fixture(SessionManagerConfig {
            heartbeat_interval: Duration::from_secs(600),
            pong_timeout: Duration::from_secs(30),
            max_frames_per_minute: 1,
        });
        seed_session(&f.sessions).await;
        let channel = MockChannel::new();
        f.manager.connect("drv-1", channel.clone()).await.unwrap();

        // Exhaust the limiter with plain GPS chatter
        for _ in 0..4 {
            f.manager.handle_frame("drv-1", &gps_frame()).await;
        }
        assert!(channel.sent().iter().any(|frame| matches!(
            frame,
            OutboundFrame::Error {
                code: ChannelErrorCode::RateLimited,
                ..
            }
        )));

        // A completion frame still goes through
        let completion = format!(
            r#"{{"type":"gps_update","lat":40.71,"lng":-74.0,"timestamp":"{}","completed_stop_id":"stop-1"}}"#,
            Utc::now().to_rfc3339()
        );
        f.manager.handle_frame("drv-1", &completion).await;

        // Generous window: a reroute for the first fix may be ahead of the
        // completion in the per-driver queue
        let mut completed = false;
        for _ in 0..150 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if f.sessions
                .get("drv-1")
                .await
                .unwrap()
                .unwrap()
                .completed_stop_ids
                == vec!["stop-1".to_string()]
            {
                completed = true;
                break;
            }
        }
        assert!(completed, "completion was dropped by the rate limiter");

        // A pong still goes through: no new error frame for it
        let errors_before = channel
            .sent()
            .iter()
            .filter(|frame| matches!(frame, OutboundFrame::Error { .. }))
            .count();
        f.manager.handle_frame("drv-1", r#"{"type":"pong"}"#).await;
        let errors_after = channel
            .sent()
            .iter()
            .filter(|frame| matches!(frame, OutboundFrame::Error { .. }))
            .count();
        assert_eq!(errors_before, errors_after);
        assert!(f.manager.is_connected("drv-1"));
    }
}
