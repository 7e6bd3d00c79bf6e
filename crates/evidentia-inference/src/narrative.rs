//! Narrative generation from step-grouped evidence snippets.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use evidentia_core::logging::subsystem;
use evidentia_core::{defaults, truncate_chars, Confidence, Error, GenerationBackend, Result, SystematicStep};

use crate::classification::strip_code_fence;

const NARRATIVE_SYSTEM_PROMPT: &str = "You write concise R&D narratives for tax-credit \
documentation. Use only the evidence provided and cite evidence ids in square brackets. \
Describe the technical uncertainty, what was tried, what was observed and what was \
concluded. Answer with a JSON object only: {\"narrative\": string, \"confidence\": \
\"high\" or \"low\", \"missing_steps\": array of step names among hypothesis, experiment, \
observation, evaluation, conclusion}.";

/// One evidence snippet as shown to the generator.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeSnippet {
    /// 8-character evidence id prefix.
    pub id: String,
    pub date: String,
    pub source: String,
    pub text: String,
}

/// Snippets for one systematic step, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct StepEvidence {
    pub step: SystematicStep,
    pub snippets: Vec<NarrativeSnippet>,
}

/// Everything the generator sees for one activity.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeRequest {
    pub hypothesis: String,
    pub activity: String,
    pub uncertainty: String,
    pub steps: Vec<StepEvidence>,
}

impl NarrativeRequest {
    pub fn new(
        hypothesis: Option<&str>,
        activity: &str,
        uncertainty: &str,
        steps: Vec<StepEvidence>,
    ) -> Self {
        Self {
            hypothesis: truncate_chars(hypothesis.unwrap_or(""), defaults::HYPOTHESIS_MAX_CHARS),
            activity: truncate_chars(activity, defaults::ACTIVITY_NAME_MAX_CHARS),
            uncertainty: truncate_chars(uncertainty, defaults::ACTIVITY_UNCERTAINTY_MAX_CHARS),
            steps,
        }
    }

    /// Named steps without a single snippet.
    pub fn uncovered_steps(&self) -> Vec<SystematicStep> {
        SystematicStep::ORDERED
            .into_iter()
            .filter(|step| {
                !self
                    .steps
                    .iter()
                    .any(|s| s.step == *step && !s.snippets.is_empty())
            })
            .collect()
    }

    pub fn to_prompt(&self) -> Result<String> {
        let payload = serde_json::to_string(self)?;
        Ok(format!(
            "Write the narrative for this activity from the evidence grouped by step.\n\n{}",
            payload
        ))
    }
}

/// Parsed generator output.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedNarrative {
    pub text: String,
    pub confidence: Confidence,
    /// Ordered, deduplicated, `Unknown` excluded.
    pub missing_steps: Vec<SystematicStep>,
}

#[derive(Deserialize)]
struct RawNarrative {
    narrative: String,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    missing_steps: Vec<String>,
}

/// Parse `{narrative, confidence, missing_steps}`.
///
/// A missing or empty narrative is a malformed response.
pub fn parse_narrative_response(raw: &str) -> Result<GeneratedNarrative> {
    let parsed: RawNarrative = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::MalformedResponse(format!("narrative output: {e}")))?;

    let text = parsed.narrative.trim().to_string();
    if text.is_empty() {
        return Err(Error::MalformedResponse("narrative is empty".to_string()));
    }

    let missing: BTreeSet<SystematicStep> = parsed
        .missing_steps
        .iter()
        .filter_map(|s| s.parse::<SystematicStep>().ok())
        .filter(|s| *s != SystematicStep::Unknown)
        .collect();

    Ok(GeneratedNarrative {
        text,
        confidence: parsed
            .confidence
            .and_then(|c| c.parse().ok())
            .unwrap_or(Confidence::Low),
        missing_steps: missing.into_iter().collect(),
    })
}

/// Generates narratives through a backend with a deadline.
#[derive(Clone)]
pub struct NarrativeGenerator {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
}

impl NarrativeGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            timeout: Duration::from_secs(defaults::NARRATIVE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Generate one narrative. Steps without evidence are always reported
    /// missing, whatever the model says.
    #[instrument(skip(self, request), fields(subsystem = subsystem::INFERENCE, component = "narrative", op = "generate"))]
    pub async fn generate(&self, request: &NarrativeRequest) -> Result<GeneratedNarrative> {
        let prompt = request.to_prompt()?;
        let start = Instant::now();

        let raw = tokio::time::timeout(
            self.timeout,
            self.backend.generate_json(NARRATIVE_SYSTEM_PROMPT, &prompt),
        )
        .await
        .map_err(|_| {
            warn!(prompt_len = prompt.len(), "Narrative generation timed out");
            Error::Timeout(self.timeout.as_secs())
        })??;

        let mut generated = parse_narrative_response(&raw)?;
        let missing: BTreeSet<SystematicStep> = generated
            .missing_steps
            .iter()
            .copied()
            .chain(request.uncovered_steps())
            .collect();
        generated.missing_steps = missing.into_iter().collect();

        debug!(
            narrative_len = generated.text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Narrative generated"
        );
        Ok(generated)
    }
}
