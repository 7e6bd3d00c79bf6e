//! Enqueue side of the narrative job queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use evidentia_core::logging::subsystem;
use evidentia_core::{defaults, EvidenceSetChanged, NarrativeJobRepository, Result};

use crate::events::ChangeSink;

/// Enqueues narrative jobs. Enqueueing is an idempotent upsert per activity.
#[derive(Clone)]
pub struct NarrativeQueue {
    jobs: Arc<dyn NarrativeJobRepository>,
}

impl NarrativeQueue {
    pub fn new(jobs: Arc<dyn NarrativeJobRepository>) -> Self {
        Self { jobs }
    }

    pub async fn enqueue(&self, project_id: Uuid, activity_id: Uuid, priority: i32) -> Result<()> {
        self.enqueue_at(project_id, activity_id, priority, Utc::now())
            .await
    }

    #[instrument(skip(self), fields(subsystem = subsystem::NARRATIVE, component = "queue", op = "enqueue"))]
    pub async fn enqueue_at(
        &self,
        project_id: Uuid,
        activity_id: Uuid,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.jobs.enqueue(project_id, activity_id, priority, now).await?;
        debug!("Narrative job enqueued");
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }
}

#[async_trait]
impl ChangeSink for NarrativeQueue {
    async fn evidence_set_changed(&self, event: EvidenceSetChanged) -> Result<()> {
        self.enqueue(
            event.project_id,
            event.activity_id,
            defaults::LINK_CHANGE_PRIORITY,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidentia_db::memory::MemoryStore;

    #[tokio::test]
    async fn test_repeated_enqueue_keeps_one_job() {
        let store = MemoryStore::new();
        let queue = NarrativeQueue::new(store.repositories().narrative_jobs);
        let project_id = Uuid::new_v4();
        let activity_id = Uuid::new_v4();

        queue.enqueue(project_id, activity_id, 1).await.unwrap();
        queue.enqueue(project_id, activity_id, 5).await.unwrap();
        queue
            .evidence_set_changed(EvidenceSetChanged {
                project_id,
                activity_id,
            })
            .await
            .unwrap();

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, 5);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
