//! Deterministic gates applied to every evidence item before any model call.
//!
//! Gates run in a fixed order and stop at the first rejection:
//! manual lock, soft delete, minimum sanitized length, recency window (with
//! backfill for recently declared activities), and term overlap with at
//! least one activity.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use evidentia_core::{
    content_hash, defaults, extract_terms, jaccard, sanitize_content, CoreActivity, EvidenceItem,
};

use crate::config::LinkingConfig;

/// Why the prefilter dropped an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ManualLock,
    Deleted,
    TooShort,
    OutsideWindow,
    NoSignal,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ManualLock => "manual_lock",
            RejectReason::Deleted => "deleted",
            RejectReason::TooShort => "too_short",
            RejectReason::OutsideWindow => "outside_window",
            RejectReason::NoSignal => "no_signal",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity with its precomputed salient terms.
#[derive(Debug, Clone)]
pub struct ActivityTerms {
    pub activity: CoreActivity,
    pub terms: Vec<String>,
}

impl ActivityTerms {
    /// Extract the top terms of `name + " " + uncertainty`.
    pub fn new(activity: CoreActivity) -> Self {
        let terms = extract_terms(&activity.term_source(), defaults::TOP_TERMS);
        Self { activity, terms }
    }

    pub fn with_terms(activity: CoreActivity, terms: Vec<String>) -> Self {
        Self { activity, terms }
    }
}

/// An evidence item that passed every gate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: EvidenceItem,
    pub sanitized: String,
    pub terms: Vec<String>,
    /// Hash of the item's current raw content.
    pub content_hash: String,
}

impl Candidate {
    /// Whether the content changed since the item was last processed.
    pub fn content_changed(&self) -> bool {
        self.item.content_hash.as_deref() != Some(self.content_hash.as_str())
    }
}

/// The prefilter gates with their thresholds.
#[derive(Debug, Clone)]
pub struct Prefilter {
    min_content_chars: usize,
    recency_window: Duration,
    backfill_window: Duration,
}

impl Default for Prefilter {
    fn default() -> Self {
        Self::new(&LinkingConfig::default())
    }
}

impl Prefilter {
    pub fn new(config: &LinkingConfig) -> Self {
        Self {
            min_content_chars: config.min_content_chars,
            recency_window: config.recency_window(),
            backfill_window: config.backfill_window(),
        }
    }

    /// Whether a recently created activity re-opens evidence older than the
    /// recency window.
    pub fn backfill_open(&self, activities: &[ActivityTerms], now: DateTime<Utc>) -> bool {
        activities
            .iter()
            .any(|a| now - a.activity.created_at <= self.backfill_window)
    }

    /// Run the gates against one evidence item.
    pub fn check(
        &self,
        item: &EvidenceItem,
        activities: &[ActivityTerms],
        now: DateTime<Utc>,
    ) -> Result<Candidate, RejectReason> {
        if item.is_manually_linked() {
            return Err(RejectReason::ManualLock);
        }
        if item.is_deleted() {
            return Err(RejectReason::Deleted);
        }

        let sanitized = sanitize_content(&item.content);
        if sanitized.chars().count() < self.min_content_chars {
            return Err(RejectReason::TooShort);
        }

        if now - item.created_at > self.recency_window && !self.backfill_open(activities, now) {
            return Err(RejectReason::OutsideWindow);
        }

        let terms = extract_terms(&sanitized, defaults::TOP_TERMS);
        let has_signal = activities
            .iter()
            .any(|a| jaccard(&terms, &a.terms) > 0.0);
        if !has_signal {
            return Err(RejectReason::NoSignal);
        }

        Ok(Candidate {
            item: item.clone(),
            sanitized,
            terms,
            content_hash: content_hash(&item.content),
        })
    }
}
