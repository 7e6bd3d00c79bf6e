//! # evidentia-api
//!
//! HTTP surface of the evidence pipeline: authenticated cron triggers for
//! the linking run and the narrative drain, the narrative render endpoint
//! and a health check.
//!
//! | Route | Method | Auth |
//! |-------|--------|------|
//! | `/health` | GET | none |
//! | `/api/cron/link-evidence` | POST | `Bearer CRON_SECRET` |
//! | `/api/cron/narratives` | POST | `Bearer CRON_SECRET` |
//! | `/api/activities/:id/narrative` | GET | none |

pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use evidentia_core::Repositories;
use evidentia_jobs::{LinkingEngine, NarrativeDrain, NarrativeRenderer};

pub use error::ApiError;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub linking: Arc<LinkingEngine>,
    pub drain: Arc<NarrativeDrain>,
    pub renderer: NarrativeRenderer,
    /// Shared secret expected on cron triggers.
    pub cron_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        linking: Arc<LinkingEngine>,
        drain: Arc<NarrativeDrain>,
        cron_secret: impl Into<Arc<str>>,
    ) -> Self {
        let renderer = NarrativeRenderer::new(repos.clone());
        Self {
            repos,
            linking,
            drain,
            renderer,
            cron_secret: cron_secret.into(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cron = Router::new()
        .route("/api/cron/link-evidence", post(handlers::cron::link_evidence))
        .route("/api/cron/narratives", post(handlers::cron::drain_narratives))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_cron_secret,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/activities/:id/narrative",
            get(handlers::narratives::get_activity_narrative),
        )
        .merge(cron)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}
