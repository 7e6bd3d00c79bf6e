//! Route handlers.

pub mod cron;
pub mod narratives;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::ApiError;
use crate::AppState;

/// Liveness plus the narrative queue depth.
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let pending = state.repos.narrative_jobs.pending_count().await?;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_narrative_jobs": pending,
    })))
}
