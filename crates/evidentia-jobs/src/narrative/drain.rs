//! Drain step of the narrative job queue.
//!
//! One run claims a bounded batch, groups it by project and, project by
//! project, generates narratives until the project's daily snippet budget is
//! spent. Jobs leave the queue only when their narrative (or placeholder) is
//! stored, or when their activity no longer exists. Failed and
//! over-budget jobs are released and retried by a later run.

use std::collections::BTreeMap;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use evidentia_core::logging::subsystem;
use evidentia_core::{
    defaults, Confidence, NarrativeJob, NarrativeUpsert, Repositories, Result, SystematicStep,
};
use evidentia_inference::{NarrativeGenerator, NarrativeRequest};

use crate::config::NarrativeConfig;
use crate::narrative::snippets::collect_snippets;
use crate::staleness::compute_input_hash;

/// Skip reason for jobs released because of the snippet budget.
pub const SKIP_BUDGET_EXCEEDED: &str = "budget_exceeded";

/// Skip reason for jobs whose project or activity is gone.
pub const SKIP_ORPHANED: &str = "orphaned";

/// Aggregate outcome of one drain run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainSummary {
    pub claimed: usize,
    /// Jobs finished with a generated narrative or a placeholder.
    pub processed: usize,
    pub placeholders: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub skip_reasons: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl DrainSummary {
    fn skip(&mut self, reason: &str, n: usize) {
        if n > 0 {
            self.skipped += n;
            *self.skip_reasons.entry(reason.to_string()).or_insert(0) += n;
        }
    }

    fn absorb(&mut self, other: DrainSummary) {
        self.processed += other.processed;
        self.placeholders += other.placeholders;
        self.failed += other.failed;
        self.skipped += other.skipped;
        for (reason, n) in other.skip_reasons {
            *self.skip_reasons.entry(reason).or_insert(0) += n;
        }
        self.errors.extend(other.errors);
    }
}

enum JobOutcome {
    Generated,
    Placeholder,
    Orphaned,
}

/// Drains the narrative queue.
pub struct NarrativeDrain {
    repos: Repositories,
    generator: NarrativeGenerator,
    config: NarrativeConfig,
}

impl NarrativeDrain {
    pub fn new(repos: Repositories, generator: NarrativeGenerator) -> Self {
        Self::with_config(repos, generator, NarrativeConfig::default())
    }

    pub fn with_config(
        repos: Repositories,
        generator: NarrativeGenerator,
        config: NarrativeConfig,
    ) -> Self {
        let generator =
            generator.with_timeout(StdDuration::from_secs(config.generate_timeout_secs));
        Self {
            repos,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &NarrativeConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<DrainSummary> {
        self.run_at(Utc::now()).await
    }

    /// Drain one batch as of `now`.
    ///
    /// Only a failure to claim jobs is returned as an error.
    #[instrument(skip(self), fields(subsystem = subsystem::NARRATIVE, component = "drain", op = "run"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<DrainSummary> {
        let start = Instant::now();
        let jobs = self
            .repos
            .narrative_jobs
            .claim_batch(
                self.config.batch_size,
                now,
                now - self.config.claim_lease(),
            )
            .await?;

        let mut summary = DrainSummary {
            claimed: jobs.len(),
            ..Default::default()
        };

        // Claim order is kept within each project.
        let mut by_project: Vec<(Uuid, Vec<NarrativeJob>)> = Vec::new();
        for job in jobs {
            match by_project.iter_mut().find(|(id, _)| *id == job.project_id) {
                Some((_, group)) => group.push(job),
                None => by_project.push((job.project_id, vec![job])),
            }
        }

        let results: Vec<DrainSummary> = stream::iter(by_project)
            .map(|(project_id, jobs)| self.drain_project(project_id, jobs, now))
            .buffer_unordered(self.config.project_concurrency.max(1))
            .collect()
            .await;
        for result in results {
            summary.absorb(result);
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            claimed = summary.claimed,
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.duration_ms,
            "Narrative drain complete"
        );
        Ok(summary)
    }

    /// Process one project's jobs in order, stopping at the budget.
    async fn drain_project(
        &self,
        project_id: Uuid,
        jobs: Vec<NarrativeJob>,
        now: DateTime<Utc>,
    ) -> DrainSummary {
        let mut summary = DrainSummary::default();
        let mut jobs = jobs.into_iter();

        while let Some(job) = jobs.next() {
            match self.budget_exhausted(project_id, now).await {
                Ok(false) => {}
                Ok(true) => {
                    let held: Vec<NarrativeJob> = std::iter::once(job).chain(jobs.by_ref()).collect();
                    info!(%project_id, jobs = held.len(), reason = SKIP_BUDGET_EXCEEDED, "Narrative jobs deferred");
                    for job in &held {
                        self.release(job, None, &mut summary).await;
                    }
                    summary.skip(SKIP_BUDGET_EXCEEDED, held.len());
                    break;
                }
                Err(e) => {
                    error!(%project_id, error = %e, "Failed to read narrative budget");
                    self.release(&job, Some(&e.to_string()), &mut summary).await;
                    summary.failed += 1;
                    summary.errors.push(format!("activity {}: {}", job.activity_id, e));
                    continue;
                }
            }

            match self.process_job(&job, now).await {
                Ok(JobOutcome::Generated) => summary.processed += 1,
                Ok(JobOutcome::Placeholder) => {
                    summary.processed += 1;
                    summary.placeholders += 1;
                }
                Ok(JobOutcome::Orphaned) => summary.skip(SKIP_ORPHANED, 1),
                Err(e) => {
                    if e.is_transient() {
                        warn!(activity_id = %job.activity_id, attempts = job.attempts + 1, error = %e, "Narrative generation failed");
                    } else {
                        error!(activity_id = %job.activity_id, attempts = job.attempts + 1, error = %e, "Narrative job failed");
                    }
                    self.release(&job, Some(&e.to_string()), &mut summary).await;
                    summary.failed += 1;
                    summary.errors.push(format!("activity {}: {}", job.activity_id, e));
                }
            }
        }
        summary
    }

    /// Estimated snippets used today against the daily cap.
    async fn budget_exhausted(&self, project_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let generated = self
            .repos
            .narratives
            .count_generated_since(
                project_id,
                now - Duration::hours(defaults::BUDGET_WINDOW_HOURS),
            )
            .await?;
        let used = generated * self.config.snippets_per_narrative;
        debug!(%project_id, used, cap = self.config.daily_snippet_cap, "Snippet budget checked");
        Ok(used >= self.config.daily_snippet_cap)
    }

    #[instrument(skip(self, job), fields(subsystem = subsystem::NARRATIVE, component = "drain", op = "process_job", activity_id = %job.activity_id))]
    async fn process_job(&self, job: &NarrativeJob, now: DateTime<Utc>) -> Result<JobOutcome> {
        let project = self.repos.projects.get(job.project_id).await?;
        let activity = self.repos.activities.get(job.activity_id).await?;
        let (Some(project), Some(activity)) = (project, activity) else {
            warn!(project_id = %job.project_id, "Orphaned narrative job deleted");
            self.repos.narrative_jobs.delete(job.activity_id).await?;
            return Ok(JobOutcome::Orphaned);
        };

        let linked = self.repos.evidence.list_linked(activity.id).await?;
        let input_hash = compute_input_hash(&project, &activity, &linked);
        let snippets = collect_snippets(
            &linked,
            self.config.snippets_per_step,
            self.config.snippet_chars,
        );

        let upsert = if snippets.is_eligible() {
            let request = NarrativeRequest::new(
                project.hypothesis.as_deref(),
                &activity.name,
                &activity.uncertainty,
                snippets.steps,
            );
            let generated = self.generator.generate(&request).await?;
            NarrativeUpsert {
                activity_id: activity.id,
                project_id: project.id,
                text: generated.text,
                confidence: generated.confidence,
                missing_steps: generated.missing_steps,
                generated_at: now,
                input_hash,
                is_placeholder: false,
                model: Some(self.generator.model_name().to_string()),
            }
        } else {
            debug!(
                items = snippets.item_count,
                distinct_steps = snippets.distinct_steps,
                "Not enough evidence, storing placeholder"
            );
            placeholder(project.id, activity.id, input_hash, now)
        };

        let stored = self.repos.narratives.upsert(&upsert).await?;
        if !self.repos.narrative_jobs.complete(job).await? {
            debug!("Job re-enqueued during processing, kept for the next run");
        }
        debug!(version = stored.version, placeholder = stored.is_placeholder, "Narrative stored");

        Ok(if stored.is_placeholder {
            JobOutcome::Placeholder
        } else {
            JobOutcome::Generated
        })
    }

    async fn release(&self, job: &NarrativeJob, error: Option<&str>, summary: &mut DrainSummary) {
        if let Err(e) = self.repos.narrative_jobs.release(job.activity_id, error).await {
            error!(activity_id = %job.activity_id, error = %e, "Failed to release narrative job");
            summary
                .errors
                .push(format!("activity {}: release failed: {}", job.activity_id, e));
        }
    }
}

/// Placeholder narrative for an activity without enough evidence.
pub fn placeholder(
    project_id: Uuid,
    activity_id: Uuid,
    input_hash: String,
    now: DateTime<Utc>,
) -> NarrativeUpsert {
    NarrativeUpsert {
        activity_id,
        project_id,
        text: defaults::PLACEHOLDER_NARRATIVE.to_string(),
        confidence: Confidence::Low,
        missing_steps: SystematicStep::ORDERED.to_vec(),
        generated_at: now,
        input_hash,
        is_placeholder: true,
        model: None,
    }
}
