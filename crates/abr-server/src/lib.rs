//! ABR Server - canonical state server
//!
//! Holds the one canonical state that engines render. Clients read and
//! write it by path over HTTP; every accepted change is validated, recorded
//! for undo/redo and announced to connected engines over the notifier
//! socket so they re-fetch.

pub mod config;
pub mod http;
pub mod media;
pub mod socket;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use store::{parse_state_path, StateStore, StoreError};

/// Notifier target telling engines to re-fetch the state
pub const STATE_TARGET: &str = abr_core::runtime::STATE_TARGET;

/// Notifier target telling clients the VisAsset library changed
pub const VISASSETS_TARGET: &str = "CacheUpdate-visassets";

/// Shared application state
pub struct AppState {
    pub store: RwLock<StateStore>,
    pub config: ServerConfig,
    notifier: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let (notifier, _) = broadcast::channel(64);
        Self {
            store: RwLock::new(StateStore::new(config.schema_version.clone())),
            config,
            notifier,
        }
    }

    /// Announce `{"target": <target>}` to every notifier client
    pub fn notify(&self, target: &str) {
        let message = serde_json::json!({ "target": target }).to_string();
        // No receivers just means no engine is connected
        let receivers = self.notifier.send(message).unwrap_or(0);
        tracing::debug!("Notified {} clients: {}", receivers, target);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notifier.subscribe()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // State endpoints
        .route("/api/state", get(http::get_state).put(http::set_state))
        .route("/api/state/{*path}", get(http::get_state_path).put(http::set_state_path))
        .route("/api/remove-path/{*path}", delete(http::remove_path))
        .route("/api/remove/{value}", delete(http::remove_all))
        .route("/api/undo", post(http::undo))
        .route("/api/redo", post(http::redo))
        // Saved states
        .route("/api/save-state/{name}", post(http::save_state))
        .route("/api/load-state/{name}", post(http::load_state))
        .route("/api/delete-state/{name}", delete(http::delete_state))
        .route("/api/list-states", get(http::list_states))
        .route("/api/thumbnail/{name}", get(http::get_thumbnail))
        // Media
        .route("/api/visassets", get(http::list_visassets))
        .route("/api/datasets", get(http::list_datasets))
        .route("/api/save-local-visasset/{uuid}", post(http::save_local_visasset))
        .route("/api/remove-visasset/{uuid}", delete(http::remove_visasset))
        .route(
            "/api/histogram/{org}/{dataset}/KeyData/{key_data}/{variable}",
            get(http::histogram),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and the notifier socket
pub async fn serve(state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    tracing::info!("ABR server listening on {}", state.config.bind_addr);

    let notifier = socket::serve_notifier(Arc::clone(&state));
    tokio::select! {
        result = axum::serve(listener, app) => result?,
        result = notifier => result?,
    }
    Ok(())
}
