//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use evidentia_core::{
    content_hash, CoreActivity, EvidenceItem, EvidenceSource, LinkSource, Project, SystematicStep,
};
use evidentia_db::memory::MemoryStore;

pub const NARRATIVE_JSON: &str =
    r#"{"narrative": "The team benchmarked adaptive eviction.", "confidence": "high", "missing_steps": []}"#;

pub struct World {
    pub store: Arc<MemoryStore>,
    pub project: Project,
    pub now: DateTime<Utc>,
}

impl World {
    pub async fn new() -> Self {
        let now = Utc::now();
        let store = MemoryStore::new();
        let project = Project {
            id: Uuid::new_v4(),
            name: "Edge cache".to_string(),
            hypothesis: Some("Adaptive eviction lowers tail latency at the edge".to_string()),
            created_at: now - Duration::days(120),
        };
        store.put_project(project.clone()).await;
        Self {
            store,
            project,
            now,
        }
    }

    pub async fn activity(&self, name: &str, uncertainty: &str) -> CoreActivity {
        let activity = CoreActivity {
            id: Uuid::new_v4(),
            project_id: self.project.id,
            name: name.to_string(),
            uncertainty: uncertainty.to_string(),
            created_at: self.now - Duration::days(90),
        };
        self.store.put_activity(activity.clone()).await;
        activity
    }

    pub async fn cache_activity(&self) -> CoreActivity {
        self.activity(
            "Cache eviction",
            "Whether adaptive eviction improves cache latency",
        )
        .await
    }

    /// Unprocessed evidence created `hours_ago`.
    pub async fn evidence(&self, content: &str, hours_ago: i64) -> EvidenceItem {
        let item = EvidenceItem::new(
            self.project.id,
            content,
            EvidenceSource::Note,
            SystematicStep::Experiment,
            self.now - Duration::hours(hours_ago),
        );
        self.store.put_evidence(item.clone()).await;
        item
    }

    /// Evidence already auto-linked to `activity` and processed.
    pub async fn linked_evidence(
        &self,
        activity: &CoreActivity,
        content: &str,
        step: SystematicStep,
        hours_ago: i64,
    ) -> EvidenceItem {
        let mut item = EvidenceItem::new(
            self.project.id,
            content,
            EvidenceSource::Note,
            step,
            self.now - Duration::hours(hours_ago),
        );
        item.linked_activity_id = Some(activity.id);
        item.link_source = Some(LinkSource::Auto);
        item.link_reason = Some("eviction benchmark".to_string());
        item.link_updated_at = Some(self.now - Duration::hours(hours_ago));
        item.link_attempted_at = item.link_updated_at;
        item.content_hash = Some(content_hash(content));
        self.store.put_evidence(item.clone()).await;
        item
    }

    pub async fn reload(&self, item: &EvidenceItem) -> EvidenceItem {
        self.store
            .repositories()
            .evidence
            .get(item.id)
            .await
            .unwrap()
            .unwrap()
    }
}

pub fn proposal(evidence_id: Uuid, activity: &str, confidence: &str) -> String {
    format!(
        r#"{{"evidence_id": "{evidence_id}", "activity": "{activity}", "reason": "eviction benchmark", "confidence": "{confidence}"}}"#
    )
}

pub fn proposals(items: &[String]) -> String {
    format!("[{}]", items.join(","))
}
