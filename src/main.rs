//! Medway Worker - route optimization and live re-routing
//!
//! Connects to NATS, serves optimization and health subjects, and runs the
//! live driver ingest/fan-out machinery on top of JetStream KV state.

mod cli;
mod config;
mod handlers;
mod services;
mod types;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();

    let config = config::Config::from_env()?;

    match cli.command {
        Some(cli::Command::Health) => run_health_probe(config).await,
        Some(cli::Command::Serve) | None => run_server(config).await,
    }
}

async fn run_server(config: config::Config) -> Result<()> {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,medway_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    info!("Starting Medway Worker...");
    info!("Configuration loaded");

    let nats_client = connect_nats(&config).await?;
    info!("Connected to NATS at {}", config.nats_url);

    if let Err(e) = handlers::start_handlers(nats_client, &config).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn run_health_probe(config: config::Config) -> Result<()> {
    let nats_client = connect_nats(&config).await?;
    let services = handlers::build_services(&nats_client, &config).await?;

    let report = services::health::probe(&services.sessions, services.maps_configured).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn connect_nats(config: &config::Config) -> Result<async_nats::Client> {
    let client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    Ok(client)
}
