use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::config::AppState;
use crate::error::{Error, Result};
use crate::models::PresenceRecord;

/// GET /presence/{user_id}
pub async fn get_presence(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PresenceRecord>> {
    info!("GET /presence/{}", user_id);

    if user_id.trim().is_empty() {
        return Err(Error::BadRequest("userId must not be empty".to_string()));
    }

    state
        .hub
        .presence(&user_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("No presence for {}", user_id)))
}
