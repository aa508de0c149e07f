//! TCP notifier socket for connected engines
//!
//! Line-delimited JSON in both directions. The server pushes
//! `{"target": ...}` messages whenever the state or the VisAsset library
//! changes; engines may push `{"target": "thumbnail", "content": <base64 png>}`.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

use crate::config::LATEST_THUMBNAIL;
use crate::media;
use crate::AppState;

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Start the notifier socket server
pub async fn serve_notifier(state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&state.config.notifier_addr).await?;
    tracing::info!("Notifier listening on {}", state.config.notifier_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!("Notifier client connected: {}", addr);
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        tracing::error!("Notifier connection error: {}", e);
                    }
                    tracing::info!("Notifier client disconnected: {}", addr);
                });
            }
            Err(e) => {
                tracing::error!("Notifier accept error: {}", e);
            }
        }
    }
}

/// Forward notifications to one client while reading what it sends back
async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> ConnectionResult {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut notifications = state.subscribe();
    let mut line = String::new();

    loop {
        tokio::select! {
            message = notifications.recv() => match message {
                Ok(message) => {
                    writer.write_all(message.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Every notification means "re-fetch", so one stands in for the skipped ones
                    tracing::warn!("Notifier client lagged by {} messages", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    return Ok(());
                }
                handle_message(&line, &state);
                line.clear();
            }
        }
    }
}

/// Handle one inbound line from an engine
fn handle_message(line: &str, state: &AppState) {
    let message: Value = match serde_json::from_str(line.trim()) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Ignoring malformed notifier message: {}", e);
            return;
        }
    };
    match message.get("target").and_then(Value::as_str) {
        Some("thumbnail") => {
            let Some(content) = message.get("content").and_then(Value::as_str) else {
                tracing::warn!("Thumbnail message without content");
                return;
            };
            match media::store_thumbnail(&state.config.thumbnails_dir, LATEST_THUMBNAIL, content) {
                Ok(()) => tracing::debug!("Stored latest thumbnail"),
                Err(e) => tracing::warn!("Failed to store thumbnail: {}", e),
            }
        }
        Some(other) => tracing::debug!("Ignoring notifier message for {}", other),
        None => tracing::warn!("Notifier message without target"),
    }
}
