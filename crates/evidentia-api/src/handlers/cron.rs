//! Cron trigger endpoints.
//!
//! Each call runs one pipeline step to completion and answers with its
//! summary. `ok` is true whenever the run itself completed; per-project and
//! per-job failures are listed in `errors`.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use evidentia_jobs::{DrainSummary, LinkRunSummary};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LinkRunResponse {
    pub ok: bool,
    pub projects: usize,
    pub linked: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub duration_ms: u64,
    pub reasons: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl From<LinkRunSummary> for LinkRunResponse {
    fn from(s: LinkRunSummary) -> Self {
        Self {
            ok: true,
            projects: s.projects,
            linked: s.linked,
            failed: s.failed,
            skipped: s.skipped,
            conflicts: s.conflicts,
            duration_ms: s.duration_ms,
            reasons: s.reasons,
            errors: s.errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DrainResponse {
    pub ok: bool,
    pub claimed: usize,
    pub processed: usize,
    pub placeholders: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub skip_reasons: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl From<DrainSummary> for DrainResponse {
    fn from(s: DrainSummary) -> Self {
        Self {
            ok: true,
            claimed: s.claimed,
            processed: s.processed,
            placeholders: s.placeholders,
            failed: s.failed,
            skipped: s.skipped,
            duration_ms: s.duration_ms,
            skip_reasons: s.skip_reasons,
            errors: s.errors,
        }
    }
}

/// `POST /api/cron/link-evidence`
pub async fn link_evidence(State(state): State<AppState>) -> Result<Json<LinkRunResponse>, ApiError> {
    info!("Linking run triggered");
    let summary = state.linking.run().await?;
    Ok(Json(summary.into()))
}

/// `POST /api/cron/narratives`
pub async fn drain_narratives(State(state): State<AppState>) -> Result<Json<DrainResponse>, ApiError> {
    info!("Narrative drain triggered");
    let summary = state.drain.run().await?;
    Ok(Json(summary.into()))
}
