//! viewlink relay server
//!
//! - Socket frames: /v1/frames/{slot}
//! - Host deliveries: POST /v1/panels/{id}
//! - Config path from `VIEWLINK_CONFIG` (default `viewlink.yaml`)
//! - Tracing span per frame

use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

use viewlink_relay::{app_state, config, router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("VIEWLINK_CONFIG").unwrap_or_else(|_| "viewlink.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg.server.listen.parse()?;

    let state = app_state::AppState::new(cfg)?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, "viewlink-relay starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;

    axum::serve(listener, app).await?;

    state.negotiator().registry().close_all();
    Ok(())
}
