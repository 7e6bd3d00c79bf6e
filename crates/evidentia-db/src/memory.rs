//! In-memory store implementing every repository trait.
//!
//! Mirrors the PostgreSQL semantics (manual-link guard, enqueue upsert,
//! claim leases, versioned narrative upsert) so pipeline tests and local runs
//! work without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use evidentia_core::{
    ActivityNarrative, ActivityRepository, AutoLink, CoreActivity, Error, EvidenceItem,
    EvidenceRepository, LinkAttempt, LinkSource, NarrativeJob, NarrativeJobRepository,
    NarrativeRepository, NarrativeUpsert, Project, ProjectRepository, Repositories, Result,
};

#[derive(Default)]
struct State {
    projects: HashMap<Uuid, Project>,
    activities: HashMap<Uuid, CoreActivity>,
    evidence: HashMap<Uuid, EvidenceItem>,
    jobs: HashMap<Uuid, NarrativeJob>,
    narratives: HashMap<Uuid, ActivityNarrative>,
    /// (project, activity, generated_at) per non-placeholder upsert.
    generations: Vec<(Uuid, Uuid, DateTime<Utc>)>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Repository bundle backed by this store.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            evidence: self.clone(),
            activities: self.clone(),
            projects: self.clone(),
            narrative_jobs: self.clone(),
            narratives: self.clone(),
        }
    }

    /// Replace an evidence row wholesale, bypassing the manual guard.
    ///
    /// Stands in for edits made outside the pipeline (content edits, manual
    /// linking, soft deletes).
    pub async fn put_evidence(&self, item: EvidenceItem) {
        self.state.write().await.evidence.insert(item.id, item);
    }

    /// Replace an activity row (e.g. an edited uncertainty statement).
    pub async fn put_activity(&self, activity: CoreActivity) {
        self.state
            .write()
            .await
            .activities
            .insert(activity.id, activity);
    }

    /// Replace a project row (e.g. an edited hypothesis).
    pub async fn put_project(&self, project: Project) {
        self.state.write().await.projects.insert(project.id, project);
    }

    /// Remove an activity, leaving its jobs and evidence behind.
    pub async fn remove_activity(&self, id: Uuid) {
        self.state.write().await.activities.remove(&id);
    }

    /// Every queued narrative job, in claim order.
    pub async fn jobs(&self) -> Vec<NarrativeJob> {
        let mut jobs: Vec<NarrativeJob> = self.state.read().await.jobs.values().cloned().collect();
        sort_claim_order(&mut jobs);
        jobs
    }
}

fn sort_claim_order(jobs: &mut [NarrativeJob]) {
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.activity_id.cmp(&b.activity_id))
    });
}

fn newest_first(items: &mut [EvidenceItem]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl EvidenceRepository for MemoryStore {
    async fn insert(&self, item: &EvidenceItem) -> Result<()> {
        let mut state = self.state.write().await;
        if state.evidence.contains_key(&item.id) {
            return Err(Error::InvalidInput(format!("duplicate evidence id {}", item.id)));
        }
        state.evidence.insert(item.id, item.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvidenceItem>> {
        Ok(self.state.read().await.evidence.get(&id).cloned())
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<EvidenceItem>> {
        let mut items: Vec<EvidenceItem> = self
            .state
            .read()
            .await
            .evidence
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect();
        newest_first(&mut items);
        Ok(items)
    }

    async fn list_linked(&self, activity_id: Uuid) -> Result<Vec<EvidenceItem>> {
        let mut items: Vec<EvidenceItem> = self
            .state
            .read()
            .await
            .evidence
            .values()
            .filter(|e| e.linked_activity_id == Some(activity_id) && !e.is_deleted())
            .cloned()
            .collect();
        newest_first(&mut items);
        Ok(items)
    }

    async fn count_attempted_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count = self
            .state
            .read()
            .await
            .evidence
            .values()
            .filter(|e| e.project_id == project_id)
            .filter(|e| e.link_attempted_at.is_some_and(|at| at >= since))
            .count();
        Ok(count as i64)
    }

    async fn record_link(&self, link: &AutoLink) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.evidence.get_mut(&link.evidence_id) {
            Some(item) if !item.is_manually_linked() => {
                item.linked_activity_id = Some(link.activity_id);
                item.link_source = Some(LinkSource::Auto);
                item.link_reason = Some(link.reason.clone());
                item.link_updated_at = Some(link.at);
                item.link_attempted_at = Some(link.at);
                item.content_hash = Some(link.content_hash.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, attempt: &LinkAttempt) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.evidence.get_mut(&attempt.evidence_id) {
            Some(item) if !item.is_manually_linked() => {
                item.link_attempted_at = Some(attempt.at);
                if let Some(hash) = &attempt.content_hash {
                    item.content_hash = Some(hash.clone());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ActivityRepository for MemoryStore {
    async fn insert(&self, activity: &CoreActivity) -> Result<()> {
        self.state
            .write()
            .await
            .activities
            .insert(activity.id, activity.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CoreActivity>> {
        Ok(self.state.read().await.activities.get(&id).cloned())
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CoreActivity>> {
        let mut activities: Vec<CoreActivity> = self
            .state
            .read()
            .await
            .activities
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        activities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(activities)
    }
}

#[async_trait]
impl ProjectRepository for MemoryStore {
    async fn insert(&self, project: &Project) -> Result<()> {
        self.state
            .write()
            .await
            .projects
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.state.read().await.projects.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> =
            self.state.read().await.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }
}

#[async_trait]
impl NarrativeJobRepository for MemoryStore {
    async fn enqueue(
        &self,
        project_id: Uuid,
        activity_id: Uuid,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .jobs
            .entry(activity_id)
            .and_modify(|job| {
                job.priority = job.priority.max(priority);
                job.updated_at = now;
            })
            .or_insert_with(|| NarrativeJob {
                activity_id,
                project_id,
                priority,
                created_at: now,
                updated_at: now,
                claimed_at: None,
                attempts: 0,
                last_error: None,
            });
        Ok(())
    }

    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<NarrativeJob>> {
        let mut state = self.state.write().await;
        let mut claimable: Vec<NarrativeJob> = state
            .jobs
            .values()
            .filter(|j| j.claimed_at.map_or(true, |at| at < lease_expired_before))
            .cloned()
            .collect();
        sort_claim_order(&mut claimable);
        claimable.truncate(limit.max(0) as usize);

        for job in &mut claimable {
            job.claimed_at = Some(now);
            if let Some(stored) = state.jobs.get_mut(&job.activity_id) {
                stored.claimed_at = Some(now);
            }
        }
        Ok(claimable)
    }

    async fn complete(&self, job: &NarrativeJob) -> Result<bool> {
        let mut state = self.state.write().await;
        let current = state.jobs.get(&job.activity_id).map(|j| j.updated_at);
        match current {
            Some(updated_at) if updated_at == job.updated_at => {
                state.jobs.remove(&job.activity_id);
                Ok(true)
            }
            Some(_) => {
                if let Some(stored) = state.jobs.get_mut(&job.activity_id) {
                    stored.claimed_at = None;
                }
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, activity_id: Uuid) -> Result<()> {
        self.state.write().await.jobs.remove(&activity_id);
        Ok(())
    }

    async fn release(&self, activity_id: Uuid, error: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(&activity_id) {
            job.claimed_at = None;
            if let Some(msg) = error {
                job.attempts += 1;
                job.last_error = Some(msg.to_string());
            }
        }
        Ok(())
    }

    async fn get(&self, activity_id: Uuid) -> Result<Option<NarrativeJob>> {
        Ok(self.state.read().await.jobs.get(&activity_id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self.state.read().await.jobs.len() as i64)
    }
}

#[async_trait]
impl NarrativeRepository for MemoryStore {
    async fn get(&self, activity_id: Uuid) -> Result<Option<ActivityNarrative>> {
        Ok(self.state.read().await.narratives.get(&activity_id).cloned())
    }

    async fn upsert(&self, narrative: &NarrativeUpsert) -> Result<ActivityNarrative> {
        let mut state = self.state.write().await;
        let version = state
            .narratives
            .get(&narrative.activity_id)
            .map_or(1, |existing| existing.version + 1);

        let stored = ActivityNarrative {
            activity_id: narrative.activity_id,
            project_id: narrative.project_id,
            text: narrative.text.clone(),
            confidence: narrative.confidence,
            missing_steps: narrative.missing_steps.clone(),
            generated_at: narrative.generated_at,
            input_hash: narrative.input_hash.clone(),
            version,
            is_placeholder: narrative.is_placeholder,
            model: narrative.model.clone(),
        };
        if !stored.is_placeholder {
            state
                .generations
                .push((stored.project_id, stored.activity_id, stored.generated_at));
        }
        state.narratives.insert(stored.activity_id, stored.clone());
        Ok(stored)
    }

    async fn count_generated_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count = self
            .state
            .read()
            .await
            .generations
            .iter()
            .filter(|(project, _, at)| *project == project_id && *at >= since)
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use evidentia_core::{Confidence, EvidenceSource, SystematicStep};

    fn evidence(project_id: Uuid) -> EvidenceItem {
        EvidenceItem::new(
            project_id,
            "Measured tail latency under synthetic load",
            EvidenceSource::Note,
            SystematicStep::Experiment,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_record_link_skips_manual_rows() {
        let store = MemoryStore::new();
        let mut item = evidence(Uuid::new_v4());
        item.link_source = Some(LinkSource::Manual);
        item.linked_activity_id = Some(Uuid::new_v4());
        EvidenceRepository::insert(store.as_ref(), &item).await.unwrap();

        let written = store
            .record_link(&AutoLink {
                evidence_id: item.id,
                activity_id: Uuid::new_v4(),
                reason: "overlap".to_string(),
                content_hash: "blake3:00".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!written);

        let attempted = store
            .record_attempt(&LinkAttempt {
                evidence_id: item.id,
                content_hash: Some("blake3:00".to_string()),
                at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!attempted);

        let stored = EvidenceRepository::get(store.as_ref(), item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.linked_activity_id, item.linked_activity_id);
        assert!(stored.link_attempted_at.is_none());
        assert!(stored.content_hash.is_none());
    }

    #[tokio::test]
    async fn test_record_attempt_without_hash_keeps_stored_hash() {
        let store = MemoryStore::new();
        let mut item = evidence(Uuid::new_v4());
        item.content_hash = Some("blake3:old".to_string());
        EvidenceRepository::insert(store.as_ref(), &item).await.unwrap();

        store
            .record_attempt(&LinkAttempt {
                evidence_id: item.id,
                content_hash: None,
                at: Utc::now(),
            })
            .await
            .unwrap();

        let stored = EvidenceRepository::get(store.as_ref(), item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some("blake3:old"));
        assert!(stored.link_attempted_at.is_some());
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_and_keeps_max_priority() {
        let store = MemoryStore::new();
        let (project, activity) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        store.enqueue(project, activity, 5, t0).await.unwrap();
        store
            .enqueue(project, activity, 1, t0 + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 1);
        let job = NarrativeJobRepository::get(store.as_ref(), activity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.priority, 5);
        assert_eq!(job.created_at, t0);
        assert_eq!(job.updated_at, t0 + Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_claim_batch_orders_and_leases() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let t0 = Utc::now();
        let (low, high, older_low) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.enqueue(project, older_low, 1, t0).await.unwrap();
        store
            .enqueue(project, low, 1, t0 + Duration::seconds(1))
            .await
            .unwrap();
        store
            .enqueue(project, high, 5, t0 + Duration::seconds(2))
            .await
            .unwrap();

        let lease = Duration::seconds(300);
        let claimed = store.claim_batch(2, t0, t0 - lease).await.unwrap();
        let ids: Vec<Uuid> = claimed.iter().map(|j| j.activity_id).collect();
        assert_eq!(ids, vec![high, older_low]);

        // Claimed jobs are invisible to an overlapping run.
        let second = store.claim_batch(10, t0, t0 - lease).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].activity_id, low);

        // Expired leases become claimable again.
        let later = t0 + Duration::seconds(600);
        let third = store.claim_batch(10, later, later - lease).await.unwrap();
        assert_eq!(third.len(), 3);
    }

    #[tokio::test]
    async fn test_complete_keeps_job_reenqueued_during_processing() {
        let store = MemoryStore::new();
        let (project, activity) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        store.enqueue(project, activity, 1, t0).await.unwrap();
        let claimed = store
            .claim_batch(1, t0, t0 - Duration::seconds(300))
            .await
            .unwrap();
        store
            .enqueue(project, activity, 1, t0 + Duration::seconds(1))
            .await
            .unwrap();

        assert!(!store.complete(&claimed[0]).await.unwrap());
        let job = NarrativeJobRepository::get(store.as_ref(), activity)
            .await
            .unwrap()
            .unwrap();
        assert!(job.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_release_with_error_bumps_attempts() {
        let store = MemoryStore::new();
        let (project, activity) = (Uuid::new_v4(), Uuid::new_v4());
        store.enqueue(project, activity, 1, Utc::now()).await.unwrap();

        store.release(activity, Some("timeout")).await.unwrap();
        store.release(activity, None).await.unwrap();

        let job = NarrativeJobRepository::get(store.as_ref(), activity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_narrative_upsert_increments_version() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let upsert = NarrativeUpsert {
            activity_id: Uuid::new_v4(),
            project_id: project,
            text: "First draft".to_string(),
            confidence: Confidence::High,
            missing_steps: vec![SystematicStep::Conclusion],
            generated_at: Utc::now(),
            input_hash: "abc".to_string(),
            is_placeholder: false,
            model: Some("mock".to_string()),
        };

        assert_eq!(store.upsert(&upsert).await.unwrap().version, 1);
        assert_eq!(store.upsert(&upsert).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_regenerations_count_against_generation_log() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let now = Utc::now();
        let upsert = NarrativeUpsert {
            activity_id: Uuid::new_v4(),
            project_id: project,
            text: "First draft".to_string(),
            confidence: Confidence::High,
            missing_steps: vec![],
            generated_at: now,
            input_hash: "abc".to_string(),
            is_placeholder: false,
            model: Some("mock".to_string()),
        };
        for _ in 0..3 {
            store.upsert(&upsert).await.unwrap();
        }
        let since = now - Duration::hours(24);
        assert_eq!(store.count_generated_since(project, since).await.unwrap(), 3);

        let placeholder = NarrativeUpsert {
            activity_id: Uuid::new_v4(),
            is_placeholder: true,
            ..upsert.clone()
        };
        store.upsert(&placeholder).await.unwrap();
        assert_eq!(store.count_generated_since(project, since).await.unwrap(), 3);

        // Entries outside the window drop out.
        let later = now + Duration::hours(1);
        assert_eq!(store.count_generated_since(project, later).await.unwrap(), 0);
        assert_eq!(
            store
                .count_generated_since(Uuid::new_v4(), since)
                .await
                .unwrap(),
            0
        );
    }
}
