//! Per-project linking runs.
//!
//! For each project: prefilter every evidence item, apply the daily budget
//! and cooldowns, send one bounded batch to the classifier, gate and
//! deconflict the proposals, then persist links and attempts. Activities
//! whose evidence set changed are reported to the [`ChangeSink`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use evidentia_core::logging::subsystem;
use evidentia_core::{
    AutoLink, CoreActivity, EvidenceSetChanged, LinkAttempt, Project, Repositories, Result,
};
use evidentia_inference::{ClassificationRequest, EvidenceSummary, LinkClassifier};

use crate::config::LinkingConfig;
use crate::events::ChangeSink;
use crate::linking::budget::{Gatekeeper, ProjectBudget, SkipReason};
use crate::linking::decision::{decide, LinkDecision};
use crate::linking::prefilter::{ActivityTerms, Candidate, Prefilter};

/// Outcome of linking one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectLinkReport {
    pub project_id: Uuid,
    /// Candidates sent to the classifier.
    pub sent: usize,
    pub linked: usize,
    /// Candidates of a failed classifier batch.
    pub failed: usize,
    /// Candidates held back by the budget, cooldowns or the batch limit.
    pub skipped: usize,
    pub conflicts: usize,
    pub budget_exceeded: bool,
    /// Counts per prefilter rejection, skip reason and decision label.
    pub reasons: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl ProjectLinkReport {
    fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            ..Default::default()
        }
    }

    fn count(&mut self, reason: &str, n: usize) {
        if n > 0 {
            *self.reasons.entry(reason.to_string()).or_insert(0) += n;
        }
    }
}

/// Aggregate outcome of one linking run across all projects.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkRunSummary {
    pub projects: usize,
    pub linked: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub duration_ms: u64,
    pub reasons: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl LinkRunSummary {
    fn absorb(&mut self, report: ProjectLinkReport) {
        self.projects += 1;
        self.linked += report.linked;
        self.failed += report.failed;
        self.skipped += report.skipped;
        self.conflicts += report.conflicts;
        for (reason, n) in report.reasons {
            *self.reasons.entry(reason).or_insert(0) += n;
        }
        self.errors.extend(
            report
                .errors
                .into_iter()
                .map(|e| format!("project {}: {}", report.project_id, e)),
        );
    }
}

/// Runs the linking pipeline over every project.
pub struct LinkingEngine {
    repos: Repositories,
    classifier: LinkClassifier,
    config: LinkingConfig,
    prefilter: Prefilter,
    gatekeeper: Gatekeeper,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl LinkingEngine {
    pub fn new(repos: Repositories, classifier: LinkClassifier) -> Self {
        Self::with_config(repos, classifier, LinkingConfig::default())
    }

    pub fn with_config(repos: Repositories, classifier: LinkClassifier, config: LinkingConfig) -> Self {
        let classifier =
            classifier.with_timeout(StdDuration::from_secs(config.classify_timeout_secs));
        Self {
            repos,
            classifier,
            prefilter: Prefilter::new(&config),
            gatekeeper: Gatekeeper::new(&config),
            config,
            sink: None,
        }
    }

    /// Report evidence-set changes to `sink`.
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &LinkingConfig {
        &self.config
    }

    /// Link every project as of now.
    pub async fn run(&self) -> Result<LinkRunSummary> {
        self.run_at(Utc::now()).await
    }

    /// Link every project as of `now`.
    ///
    /// Only a failure to list projects is returned as an error. Per-project
    /// failures are logged and reported in the summary.
    #[instrument(skip(self), fields(subsystem = subsystem::LINKING, component = "engine", op = "run"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<LinkRunSummary> {
        let start = Instant::now();
        let projects = self.repos.projects.list().await?;

        let results: Vec<(Uuid, Result<ProjectLinkReport>)> = stream::iter(projects)
            .map(|project| async move {
                let id = project.id;
                (id, self.run_project_at(&project, now).await)
            })
            .buffer_unordered(self.config.project_concurrency.max(1))
            .collect()
            .await;

        let mut summary = LinkRunSummary::default();
        for (project_id, result) in results {
            match result {
                Ok(report) => summary.absorb(report),
                Err(e) => {
                    error!(%project_id, error = %e, "Linking run failed for project");
                    summary.projects += 1;
                    summary.errors.push(format!("project {project_id}: {e}"));
                }
            }
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            projects = summary.projects,
            linked = summary.linked,
            failed = summary.failed,
            skipped = summary.skipped,
            conflicts = summary.conflicts,
            duration_ms = summary.duration_ms,
            "Linking run complete"
        );
        Ok(summary)
    }

    /// Link one project as of `now`.
    #[instrument(skip(self, project), fields(subsystem = subsystem::LINKING, component = "engine", op = "run_project", project_id = %project.id))]
    pub async fn run_project_at(
        &self,
        project: &Project,
        now: DateTime<Utc>,
    ) -> Result<ProjectLinkReport> {
        let mut report = ProjectLinkReport::new(project.id);

        let activities: Vec<ActivityTerms> = self
            .repos
            .activities
            .list_for_project(project.id)
            .await?
            .into_iter()
            .map(ActivityTerms::new)
            .collect();
        if activities.is_empty() {
            debug!("Project has no activities");
            return Ok(report);
        }

        let evidence = self.repos.evidence.list_for_project(project.id).await?;
        let mut candidates: Vec<Candidate> = Vec::new();
        for item in &evidence {
            match self.prefilter.check(item, &activities, now) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => report.count(reason.as_str(), 1),
            }
        }
        if candidates.is_empty() {
            return Ok(report);
        }

        let headroom = match self
            .gatekeeper
            .project_budget(self.repos.evidence.as_ref(), project.id, now)
            .await?
        {
            ProjectBudget::Available { headroom, .. } => headroom,
            ProjectBudget::Exceeded { used } => {
                info!(used, cap = self.config.daily_cap, reason = SkipReason::BudgetExceeded.as_str(), "Project skipped");
                report.budget_exceeded = true;
                report.skipped += candidates.len();
                report.count(SkipReason::BudgetExceeded.as_str(), candidates.len());
                return Ok(report);
            }
        };

        let selection = self.gatekeeper.select(candidates, headroom, now);
        report.skipped += selection.cooldown + selection.over_limit;
        report.count(SkipReason::Cooldown.as_str(), selection.cooldown);
        report.count(SkipReason::BatchLimit.as_str(), selection.over_limit);
        let selected = selection.selected;
        if selected.is_empty() {
            return Ok(report);
        }
        report.sent = selected.len();

        let request = self.build_request(project, &activities, &selected);
        let proposals = match self.classifier.classify(&request).await {
            Ok(proposals) => proposals,
            Err(e) => {
                if e.is_transient() {
                    warn!(candidate_count = selected.len(), error = %e, "Classifier batch failed");
                } else {
                    error!(candidate_count = selected.len(), error = %e, "Classifier batch failed");
                }
                // The hash is stored so the retry cooldown applies to the
                // failed batch; linked items whose content moved still report
                // the change.
                let mut changed: BTreeSet<Uuid> = BTreeSet::new();
                for candidate in &selected {
                    let written = self
                        .repos
                        .evidence
                        .record_attempt(&LinkAttempt {
                            evidence_id: candidate.item.id,
                            content_hash: Some(candidate.content_hash.clone()),
                            at: now,
                        })
                        .await?;
                    if written && candidate.content_changed() {
                        changed.extend(candidate.item.linked_activity_id);
                    }
                }
                report.failed = selected.len();
                report.errors.push(e.to_string());
                for activity_id in changed {
                    self.notify(project.id, activity_id, &mut report).await;
                }
                return Ok(report);
            }
        };

        let batch = decide(
            &selected,
            &activities,
            &proposals,
            self.config.rule_score_threshold,
        );
        report.conflicts = batch.conflicts;

        let mut changed: BTreeSet<Uuid> = BTreeSet::new();
        for candidate in &selected {
            let decision = batch.for_evidence(candidate.item.id);
            report.count(decision.label(), 1);
            let previous = candidate.item.linked_activity_id;

            if let LinkDecision::Accepted {
                activity_id,
                reason,
                score,
            } = decision
            {
                let written = self
                    .repos
                    .evidence
                    .record_link(&AutoLink {
                        evidence_id: candidate.item.id,
                        activity_id: *activity_id,
                        reason: reason.clone(),
                        content_hash: candidate.content_hash.clone(),
                        at: now,
                    })
                    .await?;
                if !written {
                    debug!(evidence_id = %candidate.item.id, "Evidence became manual during the run");
                    continue;
                }
                debug!(evidence_id = %candidate.item.id, activity_id = %activity_id, rule_score = *score, "Evidence linked");
                report.linked += 1;
                if previous != Some(*activity_id) {
                    changed.extend(previous);
                    changed.insert(*activity_id);
                } else if candidate.content_changed() {
                    changed.insert(*activity_id);
                }
            } else {
                let written = self
                    .repos
                    .evidence
                    .record_attempt(&LinkAttempt {
                        evidence_id: candidate.item.id,
                        content_hash: Some(candidate.content_hash.clone()),
                        at: now,
                    })
                    .await?;
                if written && candidate.content_changed() {
                    changed.extend(previous);
                }
            }
        }

        for activity_id in changed {
            self.notify(project.id, activity_id, &mut report).await;
        }

        info!(
            candidate_count = report.sent,
            linked = report.linked,
            conflicts = report.conflicts,
            skipped = report.skipped,
            "Project linked"
        );
        Ok(report)
    }

    fn build_request(
        &self,
        project: &Project,
        activities: &[ActivityTerms],
        selected: &[Candidate],
    ) -> ClassificationRequest {
        let summaries = selected
            .iter()
            .map(|c| {
                EvidenceSummary::new(
                    c.item.id,
                    c.item.systematic_step,
                    c.item.created_at,
                    &c.sanitized,
                    &c.terms,
                )
            })
            .collect();
        let activities: Vec<CoreActivity> = activities.iter().map(|a| a.activity.clone()).collect();
        ClassificationRequest::new(project.hypothesis.as_deref(), &activities, summaries)
    }

    async fn notify(&self, project_id: Uuid, activity_id: Uuid, report: &mut ProjectLinkReport) {
        let Some(sink) = &self.sink else {
            return;
        };
        let event = EvidenceSetChanged {
            project_id,
            activity_id,
        };
        if let Err(e) = sink.evidence_set_changed(event).await {
            warn!(%activity_id, error = %e, "Failed to report evidence set change");
            report.errors.push(format!("activity {activity_id}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use evidentia_core::{EvidenceItem, EvidenceSource, SystematicStep};
    use evidentia_db::memory::MemoryStore;
    use evidentia_inference::mock::MockGenerationBackend;

    use crate::events::RecordingSink;

    struct Fixture {
        store: Arc<MemoryStore>,
        project: Project,
        activity: CoreActivity,
    }

    async fn fixture(now: DateTime<Utc>) -> Fixture {
        let store = MemoryStore::new();
        let project = Project {
            id: Uuid::new_v4(),
            name: "Edge cache".to_string(),
            hypothesis: Some("Adaptive eviction lowers tail latency".to_string()),
            created_at: now - Duration::days(100),
        };
        let activity = CoreActivity {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "Cache eviction".to_string(),
            uncertainty: "Whether adaptive eviction improves cache latency".to_string(),
            created_at: now - Duration::days(90),
        };
        store.put_project(project.clone()).await;
        store.put_activity(activity.clone()).await;
        Fixture {
            store,
            project,
            activity,
        }
    }

    fn proposal_json(evidence_id: Uuid, activity: &str, confidence: &str) -> String {
        format!(
            r#"[{{"evidence_id": "{evidence_id}", "activity": "{activity}", "reason": "eviction benchmark", "confidence": "{confidence}"}}]"#
        )
    }

    #[tokio::test]
    async fn test_content_change_on_linked_item_reports_activity() {
        let now = Utc::now();
        let f = fixture(now).await;
        let mut item = EvidenceItem::new(
            f.project.id,
            "Measured cache eviction latency after the rewrite",
            EvidenceSource::Note,
            SystematicStep::Observation,
            now - Duration::days(1),
        );
        item.linked_activity_id = Some(f.activity.id);
        item.link_source = Some(evidentia_core::LinkSource::Auto);
        item.link_updated_at = Some(now - Duration::hours(2));
        item.link_attempted_at = item.link_updated_at;
        item.content_hash = Some(evidentia_core::content_hash("an older draft"));
        f.store.put_evidence(item.clone()).await;

        let backend = MockGenerationBackend::new().with_fixed_response("[]");
        let sink = Arc::new(RecordingSink::new());
        let engine = LinkingEngine::new(
            f.store.repositories(),
            LinkClassifier::new(Arc::new(backend)),
        )
        .with_change_sink(sink.clone());

        let report = engine.run_project_at(&f.project, now).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.linked, 0);
        assert_eq!(
            sink.events(),
            vec![EvidenceSetChanged {
                project_id: f.project.id,
                activity_id: f.activity.id
            }]
        );

        let stored = f.store.repositories().evidence.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored.linked_activity_id, Some(f.activity.id));
        assert_eq!(
            stored.content_hash.as_deref(),
            Some(evidentia_core::content_hash(&item.content).as_str())
        );
    }

    #[tokio::test]
    async fn test_relink_reports_old_and_new_activity() {
        let now = Utc::now();
        let f = fixture(now).await;
        let other = CoreActivity {
            id: Uuid::new_v4(),
            project_id: f.project.id,
            name: "Latency tracing".to_string(),
            uncertainty: "Whether tracing explains cache latency spikes".to_string(),
            created_at: now - Duration::days(80),
        };
        f.store.put_activity(other.clone()).await;

        let content = "Tracing cache latency spikes during eviction";
        let mut item = EvidenceItem::new(
            f.project.id,
            content,
            EvidenceSource::Note,
            SystematicStep::Observation,
            now - Duration::days(1),
        );
        item.linked_activity_id = Some(f.activity.id);
        item.link_source = Some(evidentia_core::LinkSource::Auto);
        item.link_updated_at = Some(now - Duration::hours(30));
        item.link_attempted_at = item.link_updated_at;
        item.content_hash = Some(evidentia_core::content_hash(content));
        f.store.put_evidence(item.clone()).await;

        let backend =
            MockGenerationBackend::new().with_fixed_response(proposal_json(item.id, "Latency tracing", "high"));
        let sink = Arc::new(RecordingSink::new());
        let engine = LinkingEngine::new(
            f.store.repositories(),
            LinkClassifier::new(Arc::new(backend)),
        )
        .with_change_sink(sink.clone());

        let report = engine.run_project_at(&f.project, now).await.unwrap();
        assert_eq!(report.linked, 1);
        let activities: BTreeSet<Uuid> = sink.events().iter().map(|e| e.activity_id).collect();
        assert_eq!(activities, BTreeSet::from([f.activity.id, other.id]));
    }

    #[tokio::test]
    async fn test_project_without_activities_is_a_no_op() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let project = Project {
            id: Uuid::new_v4(),
            name: "Empty".to_string(),
            hypothesis: None,
            created_at: now,
        };
        store.put_project(project.clone()).await;

        let backend = MockGenerationBackend::new();
        let engine = LinkingEngine::new(
            store.repositories(),
            LinkClassifier::new(Arc::new(backend.clone())),
        );
        let report = engine.run_project_at(&project, now).await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(backend.call_count(), 0);
    }
}
