//! ABR Server Binary
//!
//! Standalone canonical state server. Configured through `ABR_*`
//! environment variables; logging through `RUST_LOG`.

use std::sync::Arc;

use abr_server::{serve, AppState, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    std::fs::create_dir_all(&config.states_dir)?;
    std::fs::create_dir_all(&config.thumbnails_dir)?;
    tracing::info!("Media root: {}", config.media_root.display());

    serve(Arc::new(AppState::new(config))).await
}
