//! Admin/REST surface: the three core operations (scan, config,
//! scan-status) plus delivery of the two generated scripts.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::{Aggregator, ScanError};
use crate::catalog::Catalog;
use crate::enforce::{client, head, OptOutState};
use crate::settings;
use crate::store::{keys, KeyValueStore};

pub struct ApiContext {
    pub catalog: Arc<Catalog>,
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<dyn KeyValueStore>,
    pub scan_interval: Duration,
}

pub async fn start_api_server(context: Arc<ApiContext>, port: u16) -> anyhow::Result<()> {
    let app = router(context);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/api/scan", post(scan))
        .route("/api/detected-tools", get(detected_tools))
        .route("/api/scan-status", get(scan_status))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/enable-detected", post(enable_detected))
        .route("/js/notrack.js", get(client_js))
        .route("/js/notrack-head.js", get(head_js))
        .with_state(context)
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}

#[derive(Deserialize)]
struct ScanQuery {
    #[serde(default)]
    force: bool,
}

async fn scan(
    State(state): State<Arc<ApiContext>>,
    Query(query): Query<ScanQuery>,
) -> impl IntoResponse {
    match state.aggregator.detect_tracking_tools(query.force).await {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(ScanError::InProgress) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "a scan is already in progress" })),
        ),
        Err(e) => internal_error(e),
    }
}

async fn detected_tools(State(state): State<Arc<ApiContext>>) -> impl IntoResponse {
    match state.aggregator.latest() {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({ "detections": [], "last_scan_time": null })),
        ),
        Err(e) => internal_error(e),
    }
}

async fn scan_status(State(state): State<Arc<ApiContext>>) -> impl IntoResponse {
    match state.aggregator.status(state.scan_interval) {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))),
        Err(e) => internal_error(e),
    }
}

async fn get_config(
    State(state): State<Arc<ApiContext>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let trackers = match settings::load_settings(state.store.as_ref()) {
        Ok(trackers) => trackers,
        Err(e) => return internal_error(e),
    };
    let custom_triggers = match state.store.get(keys::CUSTOM_TRIGGERS) {
        Ok(triggers) => triggers.unwrap_or_default(),
        Err(e) => return internal_error(e),
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "trackers": trackers,
            "custom_triggers": custom_triggers,
        })),
    )
}

async fn set_config(
    State(state): State<Arc<ApiContext>>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Some(raw_trackers) = payload.get("trackers") {
        let sanitized = settings::sanitize_tracker_config(&state.catalog, raw_trackers);
        if let Err(e) = settings::save_settings(state.store.as_ref(), &sanitized) {
            return internal_error(e);
        }
    }
    // Custom triggers are an opaque passthrough; the client script catches
    // selector errors at bind time.
    if let Some(triggers) = payload.get("custom_triggers").and_then(|v| v.as_str()) {
        if let Err(e) = state.store.set(keys::CUSTOM_TRIGGERS, triggers) {
            return internal_error(e);
        }
    }
    get_config(State(state)).await
}

async fn enable_detected(State(state): State<Arc<ApiContext>>) -> impl IntoResponse {
    match settings::enable_detected_trackers(state.store.as_ref(), &state.catalog) {
        Ok(changed) => (
            StatusCode::OK,
            Json(serde_json::json!({ "enabled": changed })),
        ),
        Err(e) => internal_error(e),
    }
}

async fn client_js(State(state): State<Arc<ApiContext>>) -> impl IntoResponse {
    let trackers = settings::load_settings(state.store.as_ref()).unwrap_or_default();
    let triggers = state
        .store
        .get(keys::CUSTOM_TRIGGERS)
        .ok()
        .flatten()
        .unwrap_or_default();
    let script = client::client_script(&state.catalog, &trackers, &triggers);
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        script,
    )
}

async fn head_js(State(state): State<Arc<ApiContext>>, headers: HeaderMap) -> impl IntoResponse {
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    let opt_out_state = OptOutState::from_cookie_header(cookie_header);
    let trackers = settings::load_settings(state.store.as_ref()).unwrap_or_default();
    let script = head::head_snippet(&state.catalog, &trackers, opt_out_state);
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        script,
    )
}
