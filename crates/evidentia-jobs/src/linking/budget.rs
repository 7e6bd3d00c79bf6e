//! Daily per-project link budget and per-item reprocessing cooldowns.
//!
//! Nothing is counted in memory: every run recomputes usage from the
//! `link_attempted_at` timestamps in the store.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use evidentia_core::{EvidenceItem, EvidenceRepository, LinkSource, Result};

use crate::config::LinkingConfig;
use crate::linking::prefilter::Candidate;

/// Why a project or candidate was held back by the gatekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The project used its daily attempt budget.
    BudgetExceeded,
    /// The item was processed recently and has not changed.
    Cooldown,
    /// Over the per-run batch limit or the remaining headroom.
    BatchLimit,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::BudgetExceeded => "budget_exceeded",
            SkipReason::Cooldown => "cooldown",
            SkipReason::BatchLimit => "batch_limit",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count project evidence attempted within `window` before `now`.
pub async fn count_since(
    evidence: &dyn EvidenceRepository,
    project_id: Uuid,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<i64> {
    evidence.count_attempted_since(project_id, now - window).await
}

/// Daily budget state of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectBudget {
    Available { used: i64, headroom: usize },
    Exceeded { used: i64 },
}

/// Candidates chosen for this run plus what was held back.
#[derive(Debug, Default)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    pub cooldown: usize,
    pub over_limit: usize,
}

/// Applies the daily cap, the cooldown policy and the per-run batch limit.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    daily_cap: i64,
    batch_limit: usize,
    window: Duration,
    success_cooldown: Duration,
    retry_cooldown: Duration,
}

impl Default for Gatekeeper {
    fn default() -> Self {
        Self::new(&LinkingConfig::default())
    }
}

impl Gatekeeper {
    pub fn new(config: &LinkingConfig) -> Self {
        Self {
            daily_cap: config.daily_cap,
            batch_limit: config.batch_limit,
            window: Duration::hours(evidentia_core::defaults::BUDGET_WINDOW_HOURS),
            success_cooldown: config.success_cooldown(),
            retry_cooldown: config.retry_cooldown(),
        }
    }

    /// Recompute the project's usage for the rolling window.
    pub async fn project_budget(
        &self,
        evidence: &dyn EvidenceRepository,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProjectBudget> {
        let used = count_since(evidence, project_id, self.window, now).await?;
        debug!(%project_id, used, cap = self.daily_cap, "Link budget checked");
        Ok(self.budget_for(used))
    }

    pub fn budget_for(&self, used: i64) -> ProjectBudget {
        if used >= self.daily_cap {
            ProjectBudget::Exceeded { used }
        } else {
            ProjectBudget::Available {
                used,
                headroom: usize::try_from(self.daily_cap - used).unwrap_or(usize::MAX),
            }
        }
    }

    /// Whether an item may be sent to the classifier again.
    ///
    /// Eligible when it was never attempted, its content changed, its
    /// automatic link is older than the success cooldown, or its last
    /// attempt without a link is older than the retry cooldown. A linked
    /// item whose latest look was an attempt (a failed or rejected
    /// re-examination) is on the retry cooldown.
    pub fn reprocess_eligible(
        &self,
        item: &EvidenceItem,
        current_hash: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if item.link_updated_at.is_none() && item.link_attempted_at.is_none() {
            return true;
        }
        // An attempt with no stored hash never saw any content.
        let content_changed = match item.content_hash.as_deref() {
            Some(stored) => stored != current_hash,
            None => item.link_attempted_at.is_none(),
        };
        if content_changed {
            return true;
        }

        let linked = item.linked_activity_id.is_some() && item.link_source == Some(LinkSource::Auto);
        let last_success = if linked { item.link_updated_at } else { None };
        match (last_success, item.link_attempted_at) {
            (Some(success), attempted) if attempted.map_or(true, |at| at <= success) => {
                now - success > self.success_cooldown
            }
            (_, Some(attempted)) => now - attempted > self.retry_cooldown,
            (_, None) => item
                .link_updated_at
                .is_some_and(|at| now - at > self.retry_cooldown),
        }
    }

    /// Pick what goes to the classifier: eligible candidates, newest first,
    /// capped by the batch limit and the remaining headroom.
    pub fn select(
        &self,
        mut candidates: Vec<Candidate>,
        headroom: usize,
        now: DateTime<Utc>,
    ) -> Selection {
        candidates.sort_by(|a, b| {
            b.item
                .created_at
                .cmp(&a.item.created_at)
                .then_with(|| b.item.id.cmp(&a.item.id))
        });

        let limit = self.batch_limit.min(headroom);
        let mut selection = Selection::default();
        for candidate in candidates {
            if !self.reprocess_eligible(&candidate.item, &candidate.content_hash, now) {
                selection.cooldown += 1;
            } else if selection.selected.len() >= limit {
                selection.over_limit += 1;
            } else {
                selection.selected.push(candidate);
            }
        }
        selection
    }
}
