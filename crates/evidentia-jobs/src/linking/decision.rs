//! Turns classifier proposals into per-candidate link decisions.
//!
//! A proposal becomes a link only when the rule score (Jaccard of the
//! evidence terms against the target activity's terms) reaches the threshold
//! AND the classifier reported high confidence. An evidence id proposed for
//! more than one distinct activity gets no link this round.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use evidentia_core::{jaccard, Confidence};
use evidentia_inference::ClassifierProposal;

use crate::linking::prefilter::{ActivityTerms, Candidate};

/// Outcome for one candidate in one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LinkDecision {
    Accepted {
        activity_id: Uuid,
        reason: String,
        score: f64,
    },
    RejectedByRule {
        score: f64,
    },
    RejectedByConfidence,
    RejectedByConflict,
    /// The classifier answered null or left the id out.
    NoProposal,
    /// The proposed activity matches none of the project's activities.
    UnknownActivity,
}

impl LinkDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LinkDecision::Accepted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            LinkDecision::Accepted { .. } => "accepted",
            LinkDecision::RejectedByRule { .. } => "rejected_by_rule",
            LinkDecision::RejectedByConfidence => "rejected_by_confidence",
            LinkDecision::RejectedByConflict => "rejected_by_conflict",
            LinkDecision::NoProposal => "no_proposal",
            LinkDecision::UnknownActivity => "unknown_activity",
        }
    }
}

/// Decisions for a whole batch, keyed by evidence id.
#[derive(Debug, Default)]
pub struct BatchDecisions {
    pub decisions: HashMap<Uuid, LinkDecision>,
    pub conflicts: usize,
}

impl BatchDecisions {
    /// Decision for a candidate; candidates the classifier skipped have none.
    pub fn for_evidence(&self, evidence_id: Uuid) -> &LinkDecision {
        self.decisions
            .get(&evidence_id)
            .unwrap_or(&LinkDecision::NoProposal)
    }
}

/// Resolve a proposed activity by case-insensitive name or by id.
pub fn match_activity<'a>(proposed: &str, activities: &'a [ActivityTerms]) -> Option<&'a ActivityTerms> {
    let needle = proposed.trim();
    activities.iter().find(|a| {
        a.activity.name.trim().eq_ignore_ascii_case(needle)
            || a.activity.id.to_string().eq_ignore_ascii_case(needle)
    })
}

/// Gate one proposal that already names a known activity.
pub fn gate(
    candidate_terms: &[String],
    target: &ActivityTerms,
    confidence: Confidence,
    reason: &str,
    threshold: f64,
) -> LinkDecision {
    let score = jaccard(candidate_terms, &target.terms);
    if score < threshold {
        return LinkDecision::RejectedByRule { score };
    }
    if confidence != Confidence::High {
        return LinkDecision::RejectedByConfidence;
    }
    LinkDecision::Accepted {
        activity_id: target.activity.id,
        reason: reason.to_string(),
        score,
    }
}

/// Decide every candidate of a batch.
///
/// Proposals for ids outside the batch are ignored. When an id is proposed
/// more than once for the same activity, the first proposal is used.
pub fn decide(
    candidates: &[Candidate],
    activities: &[ActivityTerms],
    proposals: &[ClassifierProposal],
    threshold: f64,
) -> BatchDecisions {
    let mut by_evidence: HashMap<Uuid, Vec<&ClassifierProposal>> = HashMap::new();
    for proposal in proposals {
        by_evidence
            .entry(proposal.evidence_id)
            .or_default()
            .push(proposal);
    }

    let mut batch = BatchDecisions::default();
    for candidate in candidates {
        let id = candidate.item.id;
        let named: Vec<&ClassifierProposal> = by_evidence
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.activity.is_some())
            .collect();

        let decision = match named.as_slice() {
            [] => LinkDecision::NoProposal,
            [first, rest @ ..] => {
                let key = |p: &ClassifierProposal| {
                    let proposed = p.activity.as_deref().unwrap_or("");
                    match match_activity(proposed, activities) {
                        Some(a) => a.activity.id.to_string(),
                        None => proposed.trim().to_lowercase(),
                    }
                };
                let first_key = key(*first);
                if rest.iter().any(|p| key(*p) != first_key) {
                    warn!(evidence_id = %id, proposals = named.len(), "Conflicting link proposals dropped");
                    batch.conflicts += 1;
                    LinkDecision::RejectedByConflict
                } else {
                    match match_activity(first.activity.as_deref().unwrap_or(""), activities) {
                        Some(target) => gate(
                            &candidate.terms,
                            target,
                            first.confidence,
                            &first.reason,
                            threshold,
                        ),
                        None => LinkDecision::UnknownActivity,
                    }
                }
            }
        };

        trace!(evidence_id = %id, decision = decision.label(), "Link decision");
        batch.decisions.insert(id, decision);
    }

    if !by_evidence.is_empty() {
        debug!(
            ignored = by_evidence.len(),
            "Classifier proposed links for evidence outside the batch"
        );
    }
    batch
}
