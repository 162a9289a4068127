use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;

use fusegate_alarm::AlarmDispatcher;
use fusegate_store::telemetry::TelemetryStore;
use fusegate_store::writer::WriteQueue;

/// State of the localhost-only admin listener. Kept apart from the proxy
/// state so the data path carries nothing it does not need.
#[derive(Clone)]
pub struct AdminState {
    pub store: TelemetryStore,
    pub writes: Arc<WriteQueue>,
    pub alarms: Option<Arc<AlarmDispatcher>>,
    pub expired_seconds: u64,
    pub start_time: DateTime<Utc>,
}

/// Admin surface: `GET|POST /sweep` runs an expiry sweep and returns its
/// plain-text report, `GET /healthz` reports liveness and queue health.
/// Meant for an external scheduler and operators, hence localhost-only.
pub fn build_admin_app(state: AdminState) -> Router {
    Router::new()
        .route("/sweep", get(run_sweep).post(run_sweep))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn run_sweep(State(state): State<AdminState>) -> Response {
    match state.store.sweep(state.expired_seconds).await {
        Ok(report) => (StatusCode::OK, report).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Sweep failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("sweep failed: {e}\n")).into_response()
        }
    }
}

async fn healthz(State(state): State<AdminState>) -> Response {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    Json(json!({
        "status": "ok",
        "uptime_seconds": uptime,
        "write_queue_depth": state.writes.len(),
        "dropped_writes": state.writes.dropped(),
        "dropped_alarms": state.alarms.as_ref().map(|a| a.dropped()).unwrap_or(0),
    }))
    .into_response()
}
