//! NATS message handlers

pub mod driver;
pub mod health;
pub mod optimize;
pub mod ping;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::Client;
use tracing::info;

use crate::config::Config;
use crate::services::fanout::{SessionManager, SessionManagerConfig};
use crate::services::ingest::IngestWorker;
use crate::services::kv::NatsKvStore;
use crate::services::matrix::{create_matrix_provider, MatrixProvider};
use crate::services::pipeline::{OptimizationPipeline, PipelineConfig};
use crate::services::session_store::SessionStore;
use crate::services::solver::SolverConfig;
use crate::services::topics::NatsTopics;

const SESSION_BUCKET: &str = "medway_driver_state";
const MATRIX_BUCKET: &str = "medway_matrix_cache";

/// Built service graph, shared by the subject handlers
pub struct Services {
    pub sessions: Arc<SessionStore>,
    pub pipeline: Arc<OptimizationPipeline>,
    pub ingest: Arc<IngestWorker>,
    pub manager: Arc<SessionManager>,
    pub maps_configured: bool,
}

/// Wire the service graph against live NATS infrastructure
pub async fn build_services(client: &Client, config: &Config) -> Result<Services> {
    let jetstream = async_nats::jetstream::new(client.clone());

    let session_kv = NatsKvStore::open(
        &jetstream,
        SESSION_BUCKET,
        Duration::from_secs(config.session_ttl_seconds),
    )
    .await?;
    let matrix_kv = NatsKvStore::open(
        &jetstream,
        MATRIX_BUCKET,
        Duration::from_secs(config.matrix_cache_ttl_seconds),
    )
    .await?;

    let sessions = Arc::new(SessionStore::new(Arc::new(session_kv)));

    let maps_configured = config.google_maps_api_key.is_some();
    let matrix = create_matrix_provider(config.google_config(), Arc::new(matrix_kv));
    let matrix: Arc<dyn MatrixProvider> = matrix;

    let pipeline = Arc::new(OptimizationPipeline::new(
        matrix.clone(),
        PipelineConfig {
            max_stops: config.max_stops_per_request,
            solver: SolverConfig::new(config.solver_time_limit_seconds),
        },
    ));

    let topics = Arc::new(NatsTopics::new(client.clone()));

    let ingest = Arc::new(IngestWorker::new(
        sessions.clone(),
        pipeline.clone(),
        matrix,
        topics.clone(),
        config.delay_thresholds(),
    ));

    let manager = Arc::new(SessionManager::new(
        topics,
        ingest.clone(),
        sessions.clone(),
        SessionManagerConfig::default(),
    ));

    Ok(Services {
        sessions,
        pipeline,
        ingest,
        manager,
        maps_configured,
    })
}

/// Start all message handlers
pub async fn start_handlers(client: Client, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let services = build_services(&client, config).await?;

    let ping_sub = client.subscribe("medway.ping").await?;
    let optimize_sub = client.subscribe("medway.route.optimize").await?;
    let health_sub = client.subscribe("medway.health").await?;
    let connect_sub = client.subscribe("medway.driver.connect").await?;
    let disconnect_sub = client.subscribe("medway.driver.disconnect").await?;
    let clear_sub = client.subscribe("medway.session.clear").await?;
    let stops_changed_sub = client.subscribe("medway.session.stops_changed").await?;

    info!("Subscribed to NATS subjects");

    let handles = vec![
        tokio::spawn(ping::handle_ping(client.clone(), ping_sub)),
        tokio::spawn(optimize::handle_optimize(
            client.clone(),
            optimize_sub,
            services.pipeline.clone(),
            services.sessions.clone(),
        )),
        tokio::spawn(health::handle_health(
            client.clone(),
            health_sub,
            services.sessions.clone(),
            services.maps_configured,
        )),
        tokio::spawn(driver::handle_connect(
            client.clone(),
            connect_sub,
            services.manager.clone(),
        )),
        tokio::spawn(driver::handle_disconnect(
            client.clone(),
            disconnect_sub,
            services.manager.clone(),
        )),
        tokio::spawn(session::handle_clear(
            client.clone(),
            clear_sub,
            services.sessions.clone(),
            services.ingest.clone(),
            services.manager.clone(),
        )),
        tokio::spawn(session::handle_stops_changed(
            client.clone(),
            stops_changed_sub,
            services.sessions.clone(),
        )),
    ];

    info!("All handlers running");

    for handle in handles {
        handle.await??;
    }

    Ok(())
}
