//! Batch evidence-to-activity classification.
//!
//! One request per project batch: the hypothesis, every activity (name and
//! uncertainty) and a compact summary of each candidate. The model answers
//! with one proposal per evidence id. Anything that is not a JSON array of
//! proposal objects fails the whole batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use evidentia_core::logging::subsystem;
use evidentia_core::{
    defaults, truncate_chars, Confidence, CoreActivity, Error, GenerationBackend, Result,
    SystematicStep,
};

const CLASSIFIER_SYSTEM_PROMPT: &str = "You match R&D work evidence to the declared core \
activity it documents. Only link evidence that clearly advances the activity's technical \
uncertainty. Answer with a JSON array only, one object per evidence id: \
{\"evidence_id\": string, \"activity\": activity name or null, \"reason\": short string, \
\"confidence\": \"high\" or \"low\"}. Use null when no activity fits.";

/// Activity as presented to the classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub name: String,
    pub uncertainty: String,
}

impl ActivitySummary {
    pub fn new(activity: &CoreActivity) -> Self {
        Self {
            name: truncate_chars(&activity.name, defaults::ACTIVITY_NAME_MAX_CHARS),
            uncertainty: truncate_chars(
                &activity.uncertainty,
                defaults::ACTIVITY_UNCERTAINTY_MAX_CHARS,
            ),
        }
    }
}

/// Evidence as presented to the classifier.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSummary {
    pub id: Uuid,
    pub step: SystematicStep,
    pub date: String,
    pub snippet: String,
    pub terms: Vec<String>,
}

impl EvidenceSummary {
    /// Build a bounded summary from sanitized content and its ranked terms.
    pub fn new(
        id: Uuid,
        step: SystematicStep,
        created_at: DateTime<Utc>,
        sanitized: &str,
        terms: &[String],
    ) -> Self {
        Self {
            id,
            step,
            date: created_at.format("%Y-%m-%d").to_string(),
            snippet: truncate_chars(sanitized, defaults::CLASSIFIER_SNIPPET_CHARS),
            terms: terms.iter().take(defaults::SUMMARY_TERMS).cloned().collect(),
        }
    }
}

/// Size-bounded batch classification request.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRequest {
    pub hypothesis: String,
    pub activities: Vec<ActivitySummary>,
    pub evidence: Vec<EvidenceSummary>,
}

impl ClassificationRequest {
    pub fn new(
        hypothesis: Option<&str>,
        activities: &[CoreActivity],
        evidence: Vec<EvidenceSummary>,
    ) -> Self {
        Self {
            hypothesis: truncate_chars(hypothesis.unwrap_or(""), defaults::HYPOTHESIS_MAX_CHARS),
            activities: activities.iter().map(ActivitySummary::new).collect(),
            evidence,
        }
    }

    /// Render the user prompt.
    pub fn to_prompt(&self) -> Result<String> {
        let payload = serde_json::to_string(self)?;
        Ok(format!(
            "Classify each evidence item against the activities.\n\n{}\n\n\
             Return the JSON array now.",
            payload
        ))
    }
}

/// One classifier answer for one evidence id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierProposal {
    pub evidence_id: Uuid,
    /// Activity name (or id) proposed; `None` when the model declined.
    pub activity: Option<String>,
    pub reason: String,
    pub confidence: Confidence,
}

#[derive(Deserialize)]
struct RawProposal {
    evidence_id: String,
    #[serde(default)]
    activity: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

/// Strip a Markdown code fence some models wrap JSON in.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a classifier response into proposals.
///
/// Accepts a top-level array, or an object whose only array value holds the
/// proposals (JSON-object response modes). Unknown confidence values count
/// as low. Ids that are not UUIDs make the batch malformed.
pub fn parse_classifier_response(raw: &str) -> Result<Vec<ClassifierProposal>> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::MalformedResponse(format!("classifier output is not JSON: {e}")))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                serde_json::Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => {
                    return Err(Error::MalformedResponse(
                        "classifier output is not a proposal array".to_string(),
                    ))
                }
            }
        }
        _ => {
            return Err(Error::MalformedResponse(
                "classifier output is not a proposal array".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .map(|item| {
            let raw: RawProposal = serde_json::from_value(item)
                .map_err(|e| Error::MalformedResponse(format!("bad proposal: {e}")))?;
            let evidence_id = Uuid::parse_str(raw.evidence_id.trim()).map_err(|_| {
                Error::MalformedResponse(format!("bad evidence id: {}", raw.evidence_id))
            })?;
            let activity = raw
                .activity
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("null"));
            let confidence = raw
                .confidence
                .and_then(|c| c.parse().ok())
                .unwrap_or(Confidence::Low);

            Ok(ClassifierProposal {
                evidence_id,
                activity,
                reason: truncate_chars(
                    raw.reason.as_deref().unwrap_or("").trim(),
                    defaults::LINK_REASON_MAX_CHARS,
                ),
                confidence,
            })
        })
        .collect()
}

/// Runs classification requests against a generation backend with a deadline.
#[derive(Clone)]
pub struct LinkClassifier {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
}

impl LinkClassifier {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            timeout: Duration::from_secs(defaults::CLASSIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Classify one batch. Timeouts, backend errors and malformed output are
    /// all returned as errors; the caller decides how to recover.
    #[instrument(skip(self, request), fields(subsystem = subsystem::INFERENCE, component = "classifier", op = "classify", candidate_count = request.evidence.len()))]
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<Vec<ClassifierProposal>> {
        let prompt = request.to_prompt()?;
        let start = Instant::now();

        let raw = tokio::time::timeout(
            self.timeout,
            self.backend.generate_json(CLASSIFIER_SYSTEM_PROMPT, &prompt),
        )
        .await
        .map_err(|_| {
            warn!(prompt_len = prompt.len(), "Classifier call timed out");
            Error::Timeout(self.timeout.as_secs())
        })??;

        let proposals = parse_classifier_response(&raw)?;
        debug!(
            proposals = proposals.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Classification complete"
        );
        Ok(proposals)
    }
}
