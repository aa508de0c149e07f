//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LATEST_THUMBNAIL;
use crate::media::{self, MediaError};
use crate::store::{parse_state_path, StoreError};
use crate::{AppState, STATE_TARGET, VISASSETS_TARGET};

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn store_error(e: StoreError) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn media_error(e: MediaError) -> (StatusCode, String) {
    let status = match e {
        MediaError::NotFound(_) => StatusCode::NOT_FOUND,
        MediaError::Invalid(_) => StatusCode::BAD_REQUEST,
        MediaError::Data(abr_io::IoError::FileNotFound(_)) => StatusCode::NOT_FOUND,
        MediaError::Io(_) | MediaError::Data(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Announce a state change when something actually changed
fn changed(state: &AppState, changed: bool) -> Json<Value> {
    if changed {
        state.notify(STATE_TARGET);
    }
    Json(json!({ "changed": changed }))
}

/// The whole state
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<Value> {
    let store = state.store.read().await;
    Json(json!({ "state": store.state() }))
}

/// The value at a state path
pub async fn get_state_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Json<Value>> {
    let segments = parse_state_path(&path);
    let store = state.store.read().await;
    store
        .get_path(&segments)
        .map(|value| Json(json!({ "state": value })))
        .ok_or((StatusCode::NOT_FOUND, format!("No state at {}", path)))
}

/// Replace the whole state
pub async fn set_state(State(state): State<Arc<AppState>>, Json(value): Json<Value>) -> ApiResult<Json<Value>> {
    let result = state.store.write().await.set_path(&[], value);
    result.map(|c| changed(&state, c)).map_err(store_error)
}

/// Set the value at a state path
pub async fn set_state_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    let segments = parse_state_path(&path);
    let result = state.store.write().await.set_path(&segments, value);
    result.map(|c| changed(&state, c)).map_err(store_error)
}

pub async fn remove_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Json<Value>> {
    let segments = parse_state_path(&path);
    let result = state.store.write().await.remove_path(&segments);
    result.map(|c| changed(&state, c)).map_err(store_error)
}

/// Remove a key from every object of the state
pub async fn remove_all(
    State(state): State<Arc<AppState>>,
    Path(value): Path<String>,
) -> ApiResult<Json<Value>> {
    let result = state.store.write().await.remove_all(&value);
    result.map(|c| changed(&state, c)).map_err(store_error)
}

pub async fn undo(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let result = state.store.write().await.undo();
    result.map(|()| changed(&state, true)).map_err(store_error)
}

pub async fn redo(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let result = state.store.write().await.redo();
    result.map(|()| changed(&state, true)).map_err(store_error)
}

pub async fn save_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let current = state.store.read().await.state().clone();
    let config = &state.config;
    media::save_state(&config.states_dir, &config.thumbnails_dir, &name, &current).map_err(media_error)?;
    Ok(Json(json!({ "saved": name })))
}

/// Make a saved state the canonical state
pub async fn load_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let saved = media::load_state(&state.config.states_dir, &name).map_err(media_error)?;
    let result = state.store.write().await.set_path(&[], saved);
    let response = result.map(|c| changed(&state, c)).map_err(store_error)?;
    tracing::info!("Loaded state {}", name);
    Ok(response)
}

pub async fn delete_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let config = &state.config;
    media::delete_state(&config.states_dir, &config.thumbnails_dir, &name).map_err(media_error)?;
    Ok(Json(json!({ "deleted": name })))
}

pub async fn list_states(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let states = media::list_states(&state.config.states_dir).map_err(media_error)?;
    Ok(Json(json!({ "states": states })))
}

/// A saved state's thumbnail; `latest` is the most recent engine thumbnail
pub async fn get_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<([(header::HeaderName, &'static str); 1], Vec<u8>)> {
    let name = if name == "latest" { LATEST_THUMBNAIL.to_string() } else { name };
    let path = media::thumbnail_path(&state.config.thumbnails_dir, &name)
        .map_err(media_error)?
        .ok_or((StatusCode::NOT_FOUND, format!("No thumbnail {}", name)))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

pub async fn list_visassets(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let manifests = media::list_visassets(&state.config.visassets_dir()).map_err(media_error)?;
    Ok(Json(Value::Object(manifests)))
}

pub async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    media::list_datasets(&state.config.datasets_dir())
        .map(Json)
        .map_err(media_error)
}

/// Export a `localVisAssets` entry of the current state into the library
pub async fn save_local_visasset(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<Json<Value>> {
    let local = {
        let store = state.store.read().await;
        store
            .get_path(&["localVisAssets".to_string(), uuid.clone()])
            .cloned()
            .ok_or((StatusCode::NOT_FOUND, format!("No local VisAsset {}", uuid)))?
    };
    let saved = media::save_local_visasset(&state.config.visassets_dir(), &local).map_err(media_error)?;
    state.notify(VISASSETS_TARGET);
    Ok(Json(json!({ "uuid": saved.to_string() })))
}

pub async fn remove_visasset(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = media::remove_visasset(&state.config.visassets_dir(), &uuid).map_err(media_error)?;
    if !removed {
        return Err((StatusCode::NOT_FOUND, format!("No VisAsset {}", uuid)));
    }
    state.notify(VISASSETS_TARGET);
    Ok(Json(json!({ "removed": uuid })))
}

/// Variable range to pad a histogram out to
#[derive(Debug, Deserialize)]
pub struct HistogramQuery {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

/// Histogram of one variable of one key data object
pub async fn histogram(
    State(state): State<Arc<AppState>>,
    Path((org, dataset, key_data, variable)): Path<(String, String, String, String)>,
    Query(query): Query<HistogramQuery>,
) -> ApiResult<Json<Value>> {
    let key_data_path = format!("{}/{}/KeyData/{}", org, dataset, key_data);
    let range = query.min.zip(query.max);
    let media_root = state.config.media_root.clone();
    let histogram = tokio::task::spawn_blocking(move || media::histogram(&media_root, &key_data_path, &variable, range))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(media_error)?;
    serde_json::to_value(histogram)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_router, ServerConfig};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const IMP: &str = "a0000000-0000-4000-8000-000000000001";

    fn app(dir: &std::path::Path) -> (Arc<AppState>, axum::Router) {
        let state = Arc::new(AppState::new(ServerConfig::with_media_root(dir)));
        (Arc::clone(&state), create_router(state))
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        let (state, router) = app(dir.path());
        let mut notifications = state.subscribe();

        let uri = format!("/api/state/impressions/{}", IMP);
        let imp = json!({"plateType": "Glyphs", "name": "floats"});
        let response = router.clone().oneshot(request("PUT", &uri, Some(imp.clone()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(notifications.recv().await.unwrap(), r#"{"target":"state"}"#);

        let response = router.clone().oneshot(request("GET", &uri, None)).await.unwrap();
        assert_eq!(body_json(response).await["state"], imp);

        let response = router
            .clone()
            .oneshot(request("GET", "/api/state/missing", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_write_and_empty_undo_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (state, router) = app(dir.path());

        let uri = format!("/api/state/impressions/{}", IMP);
        let response = router
            .clone()
            .oneshot(request("PUT", &uri, Some(json!({"plateType": "Teapots"}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.read().await.undo_depth(), 0);

        let response = router.oneshot(request("POST", "/api/undo", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undo_redo_round() {
        let dir = tempfile::tempdir().unwrap();
        let (state, router) = app(dir.path());
        router
            .clone()
            .oneshot(request("PUT", "/api/state/name", Some(json!("first"))))
            .await
            .unwrap();

        let response = router.clone().oneshot(request("POST", "/api/undo", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.read().await.state().get("name").is_none());

        router.oneshot(request("POST", "/api/redo", None)).await.unwrap();
        assert_eq!(state.store.read().await.state()["name"], "first");
    }

    #[tokio::test]
    async fn test_save_list_load_states() {
        let dir = tempfile::tempdir().unwrap();
        let (state, router) = app(dir.path());
        router
            .clone()
            .oneshot(request("PUT", "/api/state/name", Some(json!("saved"))))
            .await
            .unwrap();
        let response = router
            .clone()
            .oneshot(request("POST", "/api/save-state/demo", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        router
            .clone()
            .oneshot(request("DELETE", "/api/remove-path/name", None))
            .await
            .unwrap();
        assert!(state.store.read().await.state().get("name").is_none());

        let response = router.clone().oneshot(request("GET", "/api/list-states", None)).await.unwrap();
        assert_eq!(body_json(response).await, json!({"states": ["demo"]}));

        router
            .clone()
            .oneshot(request("POST", "/api/load-state/demo.json", None))
            .await
            .unwrap();
        assert_eq!(state.store.read().await.state()["name"], "saved");

        let response = router
            .oneshot(request("POST", "/api/load-state/nope", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
