//! HTTP + WebSocket control surface (spec §4.7, §6).
//!
//! Built on `axum`, grounded in the teacher's `rest/mod.rs` router-assembly
//! idiom (`State<Arc<_>>` extractor, routes grouped by concern) and
//! `ipc/event.rs`'s broadcaster for the WebSocket feed.

pub mod routes;
pub mod ws;

use crate::engine::Engine;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/config", get(routes::get_config).post(routes::update_config))
        .route("/api/settings", post(routes::update_config))
        .route("/api/mode", post(routes::set_mode))
        .route("/api/preload", post(routes::preload))
        .route("/api/start", post(routes::start))
        .route("/api/pause", post(routes::pause))
        .route("/api/resync", post(routes::resync))
        .route("/api/reset-clock", post(routes::reset_clock))
        .route("/ws", get(ws::status_feed))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Arc<Engine>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(engine);
    info!(%addr, "control surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
