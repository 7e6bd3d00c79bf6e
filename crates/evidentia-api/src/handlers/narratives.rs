use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use evidentia_jobs::RenderedNarrative;

use crate::error::ApiError;
use crate::AppState;

/// `GET /api/activities/:id/narrative`
///
/// Serves the cached narrative (or the placeholder) immediately. A stale or
/// missing narrative is queued for regeneration as a side effect.
pub async fn get_activity_narrative(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RenderedNarrative>, ApiError> {
    let rendered = state.renderer.render(id).await?;
    Ok(Json(rendered))
}
