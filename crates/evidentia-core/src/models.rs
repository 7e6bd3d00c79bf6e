//! Data model for evidence, activities, projects and narratives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// ENUMS
// =============================================================================

/// Stage of the R&D method an evidence item documents.
///
/// The five named stages are ordered; `Unknown` sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystematicStep {
    Hypothesis,
    Experiment,
    Observation,
    Evaluation,
    Conclusion,
    Unknown,
}

impl SystematicStep {
    /// The five named stages, in method order.
    pub const ORDERED: [SystematicStep; 5] = [
        SystematicStep::Hypothesis,
        SystematicStep::Experiment,
        SystematicStep::Observation,
        SystematicStep::Evaluation,
        SystematicStep::Conclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystematicStep::Hypothesis => "hypothesis",
            SystematicStep::Experiment => "experiment",
            SystematicStep::Observation => "observation",
            SystematicStep::Evaluation => "evaluation",
            SystematicStep::Conclusion => "conclusion",
            SystematicStep::Unknown => "unknown",
        }
    }

    /// Human label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            SystematicStep::Hypothesis => "Hypothesis",
            SystematicStep::Experiment => "Experiment",
            SystematicStep::Observation => "Observation",
            SystematicStep::Evaluation => "Evaluation",
            SystematicStep::Conclusion => "Conclusion",
            SystematicStep::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SystematicStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystematicStep {
    type Err = Error;

    /// Lenient parse: case-insensitive, unrecognized values map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "hypothesis" => SystematicStep::Hypothesis,
            "experiment" | "experimentation" => SystematicStep::Experiment,
            "observation" => SystematicStep::Observation,
            "evaluation" => SystematicStep::Evaluation,
            "conclusion" => SystematicStep::Conclusion,
            _ => SystematicStep::Unknown,
        })
    }
}

/// Who created an evidence link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSource {
    /// Set by a person; the pipeline must never overwrite it.
    Manual,
    /// Set by the linking pipeline.
    Auto,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSource::Manual => "manual",
            LinkSource::Auto => "auto",
        }
    }
}

impl FromStr for LinkSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(LinkSource::Manual),
            "auto" => Ok(LinkSource::Auto),
            other => Err(Error::InvalidInput(format!("unknown link source: {other}"))),
        }
    }
}

/// Confidence level reported by the classifier and the narrative generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Low => "low",
        }
    }
}

impl FromStr for Confidence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "low" => Ok(Confidence::Low),
            other => Err(Error::InvalidInput(format!("unknown confidence: {other}"))),
        }
    }
}

/// Where an evidence item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Note,
    Email,
    Commit,
    /// Uploaded file attachment; excluded from narrative snippets.
    File,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Note => "note",
            EvidenceSource::Email => "email",
            EvidenceSource::Commit => "commit",
            EvidenceSource::File => "file",
        }
    }
}

impl FromStr for EvidenceSource {
    type Err = Error;

    /// Unrecognized labels are treated as notes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "email" => EvidenceSource::Email,
            "commit" => EvidenceSource::Commit,
            "file" | "upload" | "attachment" => EvidenceSource::File,
            _ => EvidenceSource::Note,
        })
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// One unit of contemporaneous work evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub content: String,
    pub source: EvidenceSource,
    pub created_at: DateTime<Utc>,
    pub systematic_step: SystematicStep,
    pub deleted_at: Option<DateTime<Utc>>,
    pub linked_activity_id: Option<Uuid>,
    pub link_source: Option<LinkSource>,
    pub link_reason: Option<String>,
    pub link_updated_at: Option<DateTime<Utc>>,
    pub link_attempted_at: Option<DateTime<Utc>>,
    /// Hash of `content` as of the last pipeline pass.
    pub content_hash: Option<String>,
}

impl EvidenceItem {
    /// Create an unprocessed, unlinked evidence item.
    pub fn new(
        project_id: Uuid,
        content: impl Into<String>,
        source: EvidenceSource,
        systematic_step: SystematicStep,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::new_v7(),
            project_id,
            content: content.into(),
            source,
            created_at,
            systematic_step,
            deleted_at: None,
            linked_activity_id: None,
            link_source: None,
            link_reason: None,
            link_updated_at: None,
            link_attempted_at: None,
            content_hash: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_manually_linked(&self) -> bool {
        self.link_source == Some(LinkSource::Manual)
    }
}

/// A declared R&D activity with a technical uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreActivity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub uncertainty: String,
    pub created_at: DateTime<Utc>,
}

impl CoreActivity {
    /// Text the activity's salient terms are extracted from.
    pub fn term_source(&self) -> String {
        format!("{} {}", self.name, self.uncertainty)
    }
}

/// A project owning evidence and activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub hypothesis: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A pending narrative job, unique per activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeJob {
    pub activity_id: Uuid,
    pub project_id: Uuid,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Refreshed whenever the job is re-enqueued.
    pub updated_at: DateTime<Utc>,
    /// Set while a drain run holds the job.
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Cached narrative for one activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityNarrative {
    pub activity_id: Uuid,
    pub project_id: Uuid,
    pub text: String,
    pub confidence: Confidence,
    pub missing_steps: Vec<SystematicStep>,
    pub generated_at: DateTime<Utc>,
    pub input_hash: String,
    pub version: i32,
    pub is_placeholder: bool,
    pub model: Option<String>,
}

/// Values written by a narrative upsert; `version` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NarrativeUpsert {
    pub activity_id: Uuid,
    pub project_id: Uuid,
    pub text: String,
    pub confidence: Confidence,
    pub missing_steps: Vec<SystematicStep>,
    pub generated_at: DateTime<Utc>,
    pub input_hash: String,
    pub is_placeholder: bool,
    pub model: Option<String>,
}

/// Values written when an evidence item gets an automatic link.
#[derive(Debug, Clone)]
pub struct AutoLink {
    pub evidence_id: Uuid,
    pub activity_id: Uuid,
    pub reason: String,
    pub content_hash: String,
    pub at: DateTime<Utc>,
}

/// Values written when an evidence item was processed without a link.
#[derive(Debug, Clone)]
pub struct LinkAttempt {
    pub evidence_id: Uuid,
    /// `None` leaves the stored hash untouched (classifier failure path).
    pub content_hash: Option<String>,
    pub at: DateTime<Utc>,
}

/// "An activity's evidence set changed" notification emitted by linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceSetChanged {
    pub project_id: Uuid,
    pub activity_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_ordering() {
        assert!(SystematicStep::Hypothesis < SystematicStep::Experiment);
        assert!(SystematicStep::Conclusion < SystematicStep::Unknown);
        let mut steps = vec![
            SystematicStep::Conclusion,
            SystematicStep::Hypothesis,
            SystematicStep::Evaluation,
        ];
        steps.sort();
        assert_eq!(
            steps,
            vec![
                SystematicStep::Hypothesis,
                SystematicStep::Evaluation,
                SystematicStep::Conclusion
            ]
        );
    }

    #[test]
    fn test_step_parse_is_lenient() {
        assert_eq!(
            "Observation".parse::<SystematicStep>().unwrap(),
            SystematicStep::Observation
        );
        assert_eq!(
            " EXPERIMENT ".parse::<SystematicStep>().unwrap(),
            SystematicStep::Experiment
        );
        assert_eq!(
            "brainstorm".parse::<SystematicStep>().unwrap(),
            SystematicStep::Unknown
        );
    }

    #[test]
    fn test_link_source_round_trip() {
        for source in [LinkSource::Manual, LinkSource::Auto] {
            assert_eq!(source.as_str().parse::<LinkSource>().unwrap(), source);
        }
        assert!("robot".parse::<LinkSource>().is_err());
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!("HIGH".parse::<Confidence>().unwrap(), Confidence::High);
        assert_eq!("low".parse::<Confidence>().unwrap(), Confidence::Low);
        assert!("medium".parse::<Confidence>().is_err());
    }

    #[test]
    fn test_confidence_serde_lowercase() {
        let json = serde_json::to_string(&Confidence::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn test_new_evidence_is_unprocessed() {
        let item = EvidenceItem::new(
            Uuid::new_v4(),
            "Ran the load test",
            EvidenceSource::Note,
            SystematicStep::Experiment,
            Utc::now(),
        );
        assert!(item.link_source.is_none());
        assert!(item.link_attempted_at.is_none());
        assert!(item.content_hash.is_none());
        assert!(!item.is_deleted());
        assert!(!item.is_manually_linked());
    }

    #[test]
    fn test_activity_term_source() {
        let activity = CoreActivity {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "Cache eviction".to_string(),
            uncertainty: "Unknown hit ratio".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(activity.term_source(), "Cache eviction Unknown hit ratio");
    }
}
