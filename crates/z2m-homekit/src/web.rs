//! HTTP surface: JSON API, server-sent events, metrics and debug views.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use z2m_homekit_core::manager::state_update;
use z2m_homekit_core::{Bridge, CoreError, Device, StateUpdate, UpdateSource};

use crate::metrics::MetricsCollector;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub metrics: MetricsCollector,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id", get(get_device))
        .route("/api/devices/:id/power", post(set_power))
        .route("/api/devices/:id/brightness", post(set_brightness))
        .route("/events", get(events))
        .route("/metrics", get(metrics))
        .route("/debug/hap", get(debug_hap))
        .route("/debug/eventbus", get(debug_eventbus))
        .with_state(state)
}

/// Serve on an already-bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "web server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

// ── Errors ───────────────────────────────────────────────────────────

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CoreError::UnknownDevice { .. } | CoreError::NotVisible { .. } => {
                StatusCode::NOT_FOUND
            }
            CoreError::CommandQueueFull { .. } | CoreError::CommandChannelClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let message = if status == StatusCode::NOT_FOUND {
            "device not found".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DeviceView {
    device: Arc<Device>,
    state: StateUpdate,
}

fn device_view(state: &AppState, id: &str) -> Result<DeviceView, ApiError> {
    let entry = state
        .bridge
        .manager()
        .device(id)
        .filter(|entry| entry.device.web)
        .ok_or_else(|| CoreError::UnknownDevice { id: id.to_owned() })?;
    let state = state_update(&entry.device, &entry.state, UpdateSource::Eventbus, Utc::now());
    Ok(DeviceView {
        device: entry.device,
        state,
    })
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceView>> {
    let now = Utc::now();
    let views = state
        .bridge
        .manager()
        .snapshot()
        .into_values()
        .filter(|entry| entry.device.web)
        .map(|entry| DeviceView {
            state: state_update(&entry.device, &entry.state, UpdateSource::Eventbus, now),
            device: entry.device,
        })
        .collect();
    Json(views)
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    device_view(&state, &id).map(Json)
}

#[derive(Debug, Deserialize)]
struct PowerRequest {
    on: bool,
}

#[derive(Debug, Deserialize)]
struct BrightnessRequest {
    brightness: i32,
}

async fn set_power(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PowerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.bridge.gateway().set_power(&id, req.on).await?;
    state
        .bridge
        .hub()
        .log_event(format!("Web UI: Toggle {id} -> {}", req.on));
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "device_id": id, "on": req.on })),
    ))
}

async fn set_brightness(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BrightnessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let brightness = req.brightness.clamp(0, 100);
    state.bridge.gateway().set_brightness(&id, brightness).await?;
    state
        .bridge
        .hub()
        .log_event(format!("Web UI: Brightness {id} -> {brightness}%"));
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "device_id": id, "brightness": brightness })),
    ))
}

// ── Push ─────────────────────────────────────────────────────────────

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut updates = state.bridge.hub().subscribe();

    let stream = async_stream::stream! {
        while let Some(update) = updates.next().await {
            match Event::default().json_data(&update) {
                Ok(event) => yield Ok(event),
                Err(e) => debug!(device_id = %update.device_id, error = %e, "failed to encode update"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE)
            .text("keepalive"),
    )
}

// ── Observability ────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.hub().health())
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn debug_hap(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.adapter().debug_info())
}

async fn debug_eventbus(State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.bridge.hub();
    Json(json!({
        "fabric": state.bridge.fabric().stats(),
        "states": hub.states(),
        "statuses": hub.statuses(),
        "sse_clients": hub.client_count(),
        "recent_events": hub.recent_events(),
    }))
}
