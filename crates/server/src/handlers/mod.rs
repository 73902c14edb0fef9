//! HTTP and WebSocket surface

pub mod health;
pub mod presence;
pub mod ws;

use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use crate::config::AppState;

pub use health::health_check;
pub use presence::get_presence;
pub use ws::ws_handler;

pub fn router(state: AppState) -> anyhow::Result<Router> {
    let origin: HeaderValue = state
        .config
        .client_origin
        .parse()
        .with_context(|| format!("Invalid CLIENT_URL {:?}", state.config.client_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST]);

    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/presence/{user_id}", get(get_presence))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
