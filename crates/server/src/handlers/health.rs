use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::AppState;
use crate::hub::HubStats;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    status: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        stats: state.hub.stats(),
    })
}
