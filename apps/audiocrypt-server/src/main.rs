//! Audiocrypt Server - standalone producer server.
//!
//! Partitions uploaded audio into encrypted time-domain slices and serves
//! them to consumers over HTTP after an ECDH-P256 key exchange.

mod config;
mod factory;
mod http;
mod transport_impl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use audiocrypt_core::{spawn_idle_sweeper, EventEmitter, LoggingEventEmitter, SessionRegistry, TaskSpawner, TokioSpawner};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;
use crate::factory::StandardTrackProcessorFactory;
use crate::http::AppState;
use crate::transport_impl::RegistryProducerTransport;

/// Audiocrypt Server - standalone producer for encrypted audio slice streaming.
#[derive(Parser, Debug)]
#[command(name = "audiocrypt-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AUDIOCRYPT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "AUDIOCRYPT_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Audiocrypt Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind_port={}, slice_duration_ms={}, slice_id_strategy={:?}",
        config.bind_port,
        config.slice_duration_ms,
        config.slice_id_strategy
    );

    let factory = Arc::new(StandardTrackProcessorFactory::new(config.slice_id_strategy));
    let emitter: Arc<dyn EventEmitter> = Arc::new(LoggingEventEmitter);
    let registry = Arc::new(SessionRegistry::new(
        config.to_pipeline_config(),
        factory,
        emitter,
    ));

    let spawner = TokioSpawner::current();
    spawn_idle_sweeper(Arc::clone(&registry), &spawner as &dyn TaskSpawner);

    let transport = Arc::new(RegistryProducerTransport::new(Arc::clone(&registry)));
    let app_state = AppState { transport };
    let app = http::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.bind_port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    log::info!("Server listening on http://{addr}");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("server error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    server_handle.abort();
    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
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
}
