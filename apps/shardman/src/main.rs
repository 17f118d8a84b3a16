//! Shardman binary
//!
//! Wires configuration, fleet metadata, the notification sink and the
//! coordinator together and serves the HTTP API.

use anyhow::Result;
use shardman::api::{self, AppState};
use shardman::config::ShardmanConfig;
use shardman::coordinator::Coordinator;
use shardman::fleet::{DiscordGatewaySource, FleetMetadataCache, FleetMetadataSource, StaticFleetSource};
use shardman::notify::{LogSink, NatsSink, NotificationSink};
use shardman::shard::MemoryRepository;
use shardman::ShardmanError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = ShardmanConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shardman={}", config.log_level).parse()?)
                .add_directive("twilight_http=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bucket_size = config.bucket_size,
        window_secs = config.window_secs,
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        "Starting Shardman"
    );

    let prometheus = shardman::metrics::install_prometheus()?;
    info!("Prometheus metrics initialized");

    // Fleet metadata source
    let source: Arc<dyn FleetMetadataSource> = match config.discord_token {
        Some(ref token) => {
            info!("Fleet size from Discord gateway info");
            Arc::new(DiscordGatewaySource::new(token.clone()))
        }
        None => {
            let total = config.total_shards.ok_or_else(|| {
                ShardmanError::Config("total_shards must be set without discord_token".to_string())
            })?;
            info!(total_shards = total, "Static fleet size");
            Arc::new(StaticFleetSource::new(total))
        }
    };
    let fleet = Arc::new(FleetMetadataCache::new(source, config.metadata_ttl()));

    match fleet.get_metadata().await {
        Ok(metadata) => info!(total_shards = metadata.total_shards, "Fleet metadata loaded"),
        Err(e) => warn!(error = %e, "Fleet metadata unavailable at startup, will retry lazily"),
    }

    // Connect to NATS if configured
    let nats = match config.nats_url {
        Some(ref url) => match NatsSink::connect(url, &config.nats_subject).await {
            Ok(sink) => {
                info!(url, "Connected to NATS");
                Some(sink)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - logging events locally");
                None
            }
        },
        None => {
            info!("No NATS URL configured - logging events locally");
            None
        }
    };
    let sink: Arc<dyn NotificationSink> = match nats {
        Some(ref nats) => nats.clone(),
        None => Arc::new(LogSink),
    };

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator(),
        Arc::new(MemoryRepository::new()),
        fleet,
        sink,
    ));

    let monitor = Arc::new(coordinator.liveness_monitor()).spawn(CancellationToken::new());

    let cors = api::cors_layer(&config.cors_origins)?;
    let router = api::router(
        AppState {
            coordinator: Arc::clone(&coordinator),
            secret: Arc::from(config.secret.as_str()),
            metrics: Some(prometheus),
        },
        cors,
    );
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let server = axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!(error = %e, "HTTP server error");
    }

    // Graceful shutdown: stop sweeping before tearing anything else down
    info!("Shutting down shardman...");
    monitor.shutdown().await;

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    info!("Shardman shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
