//! Operational and host-facing HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/metrics` : Prometheus text format
//! - `/v1/panels/{id}` : host deliveries and per-panel status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::relay::Routed;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.metrics().render();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Host delivery. The body is a raw envelope, validated by the bus.
pub async fn deliver_panel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let routed = state.bus().lock().await.deliver_value(&id, body);

    match routed {
        Routed::Live | Routed::Cached => (
            StatusCode::ACCEPTED,
            Json(json!({ "panel": id, "routed": routed.as_str() })),
        )
            .into_response(),
        Routed::Rejected | Routed::Dropped => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "panel": id,
                "routed": routed.as_str(),
                "code": "MALFORMED_ENVELOPE",
                "msg": "envelope rejected"
            })),
        )
            .into_response(),
    }
}

pub async fn panel_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let bus = state.bus().lock().await;
    let cached = bus.last_delivered(&id).is_some();

    match bus.connection(&id) {
        Some(conn) => {
            let s = conn.snapshot();
            Json(json!({
                "panel": id,
                "mounted": true,
                "cached": cached,
                "frame": s.frame.to_string(),
                "transport": s.transport.as_str(),
                "status": s.status.as_str(),
                "deliveries": s.deliveries,
                "lastError": s.last_error,
            }))
            .into_response()
        }
        None if cached => Json(json!({
            "panel": id,
            "mounted": false,
            "cached": true,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "panel": id, "code": "DEAD_TARGET", "msg": "unknown panel" })),
        )
            .into_response(),
    }
}
