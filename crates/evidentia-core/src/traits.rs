//! Core traits for evidentia abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable stores and inference backends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// EVIDENCE
// =============================================================================

/// Repository for evidence items and their link state.
#[async_trait]
pub trait EvidenceRepository: Send + Sync {
    /// Insert an evidence item as-is.
    async fn insert(&self, item: &EvidenceItem) -> Result<()>;

    /// Get an evidence item by ID, including soft-deleted ones.
    async fn get(&self, id: Uuid) -> Result<Option<EvidenceItem>>;

    /// All evidence of a project, newest first.
    ///
    /// Soft-deleted and manually linked rows are included so the prefilter
    /// can account for them.
    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<EvidenceItem>>;

    /// Non-deleted evidence linked to an activity, newest first.
    async fn list_linked(&self, activity_id: Uuid) -> Result<Vec<EvidenceItem>>;

    /// Count project evidence with `link_attempted_at >= since`.
    async fn count_attempted_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    /// Persist an automatic link.
    ///
    /// Returns `false` without writing when the row is missing or has been
    /// manually linked.
    async fn record_link(&self, link: &AutoLink) -> Result<bool>;

    /// Persist a processed-but-unlinked attempt.
    ///
    /// Only `link_attempted_at` (and `content_hash` when given) change. Same
    /// manual guard as [`record_link`](Self::record_link).
    async fn record_attempt(&self, attempt: &LinkAttempt) -> Result<bool>;
}

// =============================================================================
// ACTIVITIES & PROJECTS
// =============================================================================

/// Repository for core activities. Read-only to the pipeline.
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn insert(&self, activity: &CoreActivity) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<CoreActivity>>;

    /// Activities of a project, oldest first.
    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CoreActivity>>;
}

/// Repository for projects.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Project>>;

    /// All projects, oldest first.
    async fn list(&self) -> Result<Vec<Project>>;
}

// =============================================================================
// NARRATIVES
// =============================================================================

/// Queue of pending narrative jobs, at most one per activity.
#[async_trait]
pub trait NarrativeJobRepository: Send + Sync {
    /// Idempotent upsert keyed by activity.
    ///
    /// An existing job keeps its row and `created_at`, takes the higher of
    /// the two priorities and has `updated_at` refreshed.
    async fn enqueue(
        &self,
        project_id: Uuid,
        activity_id: Uuid,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Claim up to `limit` jobs, highest priority first then oldest.
    ///
    /// Jobs whose claim is older than `lease_expired_before` are claimable
    /// again. Concurrent callers never receive the same job.
    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<NarrativeJob>>;

    /// Delete a finished job unless it was re-enqueued while claimed.
    ///
    /// Returns `true` when the row was deleted. A job re-enqueued during
    /// processing is released instead so it runs again.
    async fn complete(&self, job: &NarrativeJob) -> Result<bool>;

    /// Delete a job unconditionally (orphans).
    async fn delete(&self, activity_id: Uuid) -> Result<()>;

    /// Drop the claim. When `error` is given, record it and bump `attempts`.
    async fn release(&self, activity_id: Uuid, error: Option<&str>) -> Result<()>;

    async fn get(&self, activity_id: Uuid) -> Result<Option<NarrativeJob>>;

    /// Number of queued jobs, claimed or not.
    async fn pending_count(&self) -> Result<i64>;
}

/// Cached narratives, one per activity.
#[async_trait]
pub trait NarrativeRepository: Send + Sync {
    async fn get(&self, activity_id: Uuid) -> Result<Option<ActivityNarrative>>;

    /// Insert or replace the narrative, incrementing `version`.
    ///
    /// Every non-placeholder write is also appended to the project's
    /// generation log, so regenerating an activity counts again.
    async fn upsert(&self, narrative: &NarrativeUpsert) -> Result<ActivityNarrative>;

    /// Count generation log entries of a project since `since`.
    async fn count_generated_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64>;
}

/// Bundle of every repository the pipeline needs.
#[derive(Clone)]
pub struct Repositories {
    pub evidence: Arc<dyn EvidenceRepository>,
    pub activities: Arc<dyn ActivityRepository>,
    pub projects: Arc<dyn ProjectRepository>,
    pub narrative_jobs: Arc<dyn NarrativeJobRepository>,
    pub narratives: Arc<dyn NarrativeRepository>,
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for structured text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response constrained to JSON, with system context.
    ///
    /// Returns the raw response text; callers parse it.
    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
