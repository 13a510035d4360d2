//! Axum router wiring.
//!
//! - `/v1/frames/{slot}` : WS upgrade, mounts a socket frame under `slot`
//! - `/v1/panels/{id}`   : POST delivers an envelope, GET reports status
//! - `/healthz`, `/metrics`

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/frames/:slot", get(transport::ws::ws_upgrade))
        .route("/v1/panels/:id", get(ops::panel_status).post(ops::deliver_panel))
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
