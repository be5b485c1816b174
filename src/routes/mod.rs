//! # routes: optional status endpoint
//!
//! Served only when `STATUS_BIND_ADDR` is set. Read-only; the tracker never
//! depends on it.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::SharedStats;

pub mod health;

pub fn router(stats: SharedStats) -> Router {
    Router::new()
        .route("/api/tracker/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(stats)
}

pub async fn serve(addr: SocketAddr, stats: SharedStats) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(?addr, "🚀 [STATUS] health endpoint listening");
    axum::serve(listener, router(stats)).await?;
    Ok(())
}
