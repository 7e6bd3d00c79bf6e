//! # evidentia-inference
//!
//! LLM access for the evidentia pipeline.
//!
//! This crate provides:
//! - Ollama backend (default, feature `ollama`)
//! - OpenAI-compatible backend (feature `openai`)
//! - The batch link classifier used by the linking engine
//! - The narrative generator used by the narrative drain
//! - A mock backend for tests (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evidentia_inference::{LinkClassifier, OllamaBackend};
//!
//! let classifier = LinkClassifier::new(Arc::new(OllamaBackend::from_env()));
//! ```

pub mod classification;
pub mod narrative;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Arc;

// Re-export core types
pub use evidentia_core::*;

pub use classification::{
    parse_classifier_response, ActivitySummary, ClassificationRequest, ClassifierProposal,
    EvidenceSummary, LinkClassifier,
};
pub use narrative::{
    parse_narrative_response, GeneratedNarrative, NarrativeGenerator, NarrativeRequest,
    NarrativeSnippet, StepEvidence,
};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

/// Select a backend from `EVIDENTIA_BACKEND` (`ollama` or `openai`).
///
/// Fails with a configuration error when the selected backend is not compiled
/// in or lacks credentials.
pub fn backend_from_env() -> Result<Arc<dyn GenerationBackend>> {
    let choice = std::env::var("EVIDENTIA_BACKEND").unwrap_or_else(|_| "ollama".to_string());
    match choice.as_str() {
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Arc::new(OllamaBackend::from_env())),
        #[cfg(feature = "openai")]
        "openai" => Ok(Arc::new(OpenAIBackend::from_env()?)),
        other => Err(Error::Config(format!(
            "inference backend '{other}' is unknown or not enabled"
        ))),
    }
}
