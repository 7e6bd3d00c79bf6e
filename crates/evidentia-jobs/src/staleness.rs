//! Narrative staleness detection and the render path.
//!
//! A cached narrative is fresh while its stored `input_hash` equals the hash
//! recomputed from the current hypothesis, activity and linked evidence.
//! Rendering never waits on generation: a stale or missing narrative is
//! enqueued and the cached text (or the placeholder) is returned as-is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use evidentia_core::logging::subsystem;
use evidentia_core::{
    defaults, input_hash, Confidence, CoreActivity, Error, EvidenceFingerprint, EvidenceItem,
    Project, Repositories, Result, SystematicStep,
};

use crate::narrative::queue::NarrativeQueue;

/// Input hash over the project hypothesis, the activity and the fingerprints
/// of its non-deleted linked evidence.
pub fn compute_input_hash(project: &Project, activity: &CoreActivity, linked: &[EvidenceItem]) -> String {
    let fingerprints: Vec<EvidenceFingerprint> = linked
        .iter()
        .filter(|item| !item.is_deleted())
        .map(EvidenceFingerprint::of)
        .collect();
    input_hash(project.hypothesis.as_deref(), activity, &fingerprints)
}

/// How the cached narrative relates to the current inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

/// What the render path returns for one activity.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedNarrative {
    pub activity_id: Uuid,
    pub text: String,
    pub confidence: Confidence,
    pub missing_steps: Vec<SystematicStep>,
    pub generated_at: Option<DateTime<Utc>>,
    pub version: Option<i32>,
    pub is_placeholder: bool,
    pub freshness: Freshness,
    /// Whether a refresh job was enqueued by this render.
    pub refresh_enqueued: bool,
}

/// Serves cached narratives and schedules refreshes for stale ones.
#[derive(Clone)]
pub struct NarrativeRenderer {
    repos: Repositories,
    queue: NarrativeQueue,
}

impl NarrativeRenderer {
    pub fn new(repos: Repositories) -> Self {
        let queue = NarrativeQueue::new(repos.narrative_jobs.clone());
        Self { repos, queue }
    }

    pub async fn render(&self, activity_id: Uuid) -> Result<RenderedNarrative> {
        self.render_at(activity_id, Utc::now()).await
    }

    #[instrument(skip(self), fields(subsystem = subsystem::NARRATIVE, component = "render", op = "render"))]
    pub async fn render_at(&self, activity_id: Uuid, now: DateTime<Utc>) -> Result<RenderedNarrative> {
        let activity = self
            .repos
            .activities
            .get(activity_id)
            .await?
            .ok_or(Error::ActivityNotFound(activity_id))?;
        let project = self
            .repos
            .projects
            .get(activity.project_id)
            .await?
            .ok_or(Error::ProjectNotFound(activity.project_id))?;

        let linked = self.repos.evidence.list_linked(activity.id).await?;
        let current = compute_input_hash(&project, &activity, &linked);
        let cached = self.repos.narratives.get(activity.id).await?;

        let freshness = match &cached {
            Some(n) if n.input_hash == current => Freshness::Fresh,
            Some(_) => Freshness::Stale,
            None => Freshness::Missing,
        };

        let mut refresh_enqueued = false;
        if freshness != Freshness::Fresh {
            match self
                .queue
                .enqueue_at(project.id, activity.id, defaults::STALE_REFRESH_PRIORITY, now)
                .await
            {
                Ok(()) => refresh_enqueued = true,
                Err(e) => warn!(%activity_id, error = %e, "Failed to enqueue narrative refresh"),
            }
        }
        debug!(?freshness, refresh_enqueued, "Narrative rendered");

        Ok(match cached {
            Some(n) => RenderedNarrative {
                activity_id: n.activity_id,
                text: n.text,
                confidence: n.confidence,
                missing_steps: n.missing_steps,
                generated_at: Some(n.generated_at),
                version: Some(n.version),
                is_placeholder: n.is_placeholder,
                freshness,
                refresh_enqueued,
            },
            None => RenderedNarrative {
                activity_id: activity.id,
                text: defaults::PLACEHOLDER_NARRATIVE.to_string(),
                confidence: Confidence::Low,
                missing_steps: SystematicStep::ORDERED.to_vec(),
                generated_at: None,
                version: None,
                is_placeholder: true,
                freshness,
                refresh_enqueued,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use evidentia_core::{content_hash, EvidenceSource, LinkSource, NarrativeUpsert};
    use evidentia_db::memory::MemoryStore;

    fn project() -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "Edge cache".to_string(),
            hypothesis: Some("Adaptive eviction lowers tail latency".to_string()),
            created_at: Utc::now(),
        }
    }

    fn activity(project_id: Uuid) -> CoreActivity {
        CoreActivity {
            id: Uuid::new_v4(),
            project_id,
            name: "Cache eviction".to_string(),
            uncertainty: "Whether adaptive eviction improves latency".to_string(),
            created_at: Utc::now(),
        }
    }

    fn linked(activity: &CoreActivity, content: &str) -> EvidenceItem {
        let mut item = EvidenceItem::new(
            activity.project_id,
            content,
            EvidenceSource::Note,
            SystematicStep::Experiment,
            Utc::now(),
        );
        item.linked_activity_id = Some(activity.id);
        item.link_source = Some(LinkSource::Auto);
        item.content_hash = Some(content_hash(content));
        item
    }

    #[test]
    fn test_hash_ignores_deleted_evidence() {
        let project = project();
        let activity = activity(project.id);
        let kept = linked(&activity, "benchmarked eviction");
        let mut deleted = linked(&activity, "old draft");
        deleted.deleted_at = Some(Utc::now());

        assert_eq!(
            compute_input_hash(&project, &activity, &[kept.clone(), deleted]),
            compute_input_hash(&project, &activity, &[kept])
        );
    }

    #[test]
    fn test_uncertainty_change_changes_hash() {
        let project = project();
        let activity = activity(project.id);
        let items = vec![linked(&activity, "benchmarked eviction")];
        let before = compute_input_hash(&project, &activity, &items);

        let mut edited = activity.clone();
        edited.uncertainty = "Whether eviction improves p99 under burst load".to_string();
        assert_ne!(before, compute_input_hash(&project, &edited, &items));
    }

    #[tokio::test]
    async fn test_missing_narrative_renders_placeholder_and_enqueues() {
        let store = MemoryStore::new();
        let project = project();
        let activity = activity(project.id);
        store.put_project(project.clone()).await;
        store.put_activity(activity.clone()).await;

        let renderer = NarrativeRenderer::new(store.repositories());
        let rendered = renderer.render(activity.id).await.unwrap();
        assert_eq!(rendered.freshness, Freshness::Missing);
        assert_eq!(rendered.text, defaults::PLACEHOLDER_NARRATIVE);
        assert!(rendered.refresh_enqueued);

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, defaults::STALE_REFRESH_PRIORITY);
    }

    #[tokio::test]
    async fn test_fresh_narrative_is_served_without_enqueue() {
        let store = MemoryStore::new();
        let project = project();
        let activity = activity(project.id);
        store.put_project(project.clone()).await;
        store.put_activity(activity.clone()).await;
        let item = linked(&activity, "benchmarked eviction");
        store.put_evidence(item.clone()).await;

        let repos = store.repositories();
        let hash = compute_input_hash(&project, &activity, &[item]);
        repos
            .narratives
            .upsert(&NarrativeUpsert {
                activity_id: activity.id,
                project_id: project.id,
                text: "The team benchmarked eviction.".to_string(),
                confidence: Confidence::High,
                missing_steps: vec![SystematicStep::Conclusion],
                generated_at: Utc::now() - Duration::hours(1),
                input_hash: hash,
                is_placeholder: false,
                model: Some("mock-model".to_string()),
            })
            .await
            .unwrap();

        let rendered = NarrativeRenderer::new(repos).render(activity.id).await.unwrap();
        assert_eq!(rendered.freshness, Freshness::Fresh);
        assert!(!rendered.refresh_enqueued);
        assert_eq!(rendered.version, Some(1));
        assert!(store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_activity_is_not_found() {
        let store = MemoryStore::new();
        let renderer = NarrativeRenderer::new(store.repositories());
        let err = renderer.render(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::ActivityNotFound(_)));
    }
}
