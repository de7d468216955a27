//! Heartbeat Mixer Server
//!
//! HTTP service that mixes an uploaded heartbeat recording over background
//! tracks from a catalog directory, streaming four rendered versions back as
//! NDJSON, and retimes audio clips to preset speeds packaged as a zip.

mod audio;
mod catalog;
mod config;
mod config_file;
mod dsp;
mod error;
mod ffmpeg;
mod http;
#[cfg(test)]
mod integration;
mod mix;
mod state;
mod tempo;
mod transcode;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Result;
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "heartbeat-mixer";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--generate-config") {
        let path = args.get(2).map(String::as_str).unwrap_or("config.toml");
        if let Err(e) = crate::config_file::generate_default_config(path) {
            eprintln!("Failed to write {}: {}", path, e);
            std::process::exit(1);
        }
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let config_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "config.toml".to_string());
    let (mut config, load_error) = crate::config_file::load_server_config(&config_path);

    init_logging(&config.log_level, &config.log_format);
    if let Some(message) = load_error {
        tracing::warn!("{}", message);
    }
    config.apply_env();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    ffmpeg::init()?;
    tracing::info!("Configuration loaded: {:?}", config);

    if !config.tracks_dir.is_dir() {
        tracing::warn!(
            tracks_dir = %config.tracks_dir.display(),
            "Track directory does not exist; /tracks will fail until it is created"
        );
    }

    let addr = config.socket_addr();
    let state = Arc::new(AppState::new(config));
    let app = create_router(state);

    tracing::info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn default_filter(level: &str) -> String {
    format!("heartbeat_mixer={},tower_http=debug", level)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
