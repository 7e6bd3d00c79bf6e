//! # evidentia-jobs
//!
//! The evidence linking pipeline and the narrative synthesis job queue.
//!
//! This crate provides:
//! - Prefilter, budget gatekeeper and dual-gate decisions for auto-linking
//! - The per-project linking engine with bounded project concurrency
//! - Narrative job enqueueing, draining and placeholder handling
//! - Input-hash staleness detection and the narrative render path
//! - An optional interval scheduler with broadcast events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use evidentia_jobs::{LinkingEngine, NarrativeDrain, NarrativeQueue};
//! use evidentia_inference::{backend_from_env, LinkClassifier, NarrativeGenerator};
//!
//! let backend = backend_from_env()?;
//! let queue = NarrativeQueue::new(repos.narrative_jobs.clone());
//! let engine = LinkingEngine::new(repos.clone(), LinkClassifier::new(backend.clone()))
//!     .with_change_sink(Arc::new(queue));
//! let summary = engine.run().await?;
//!
//! let drain = NarrativeDrain::new(repos, NarrativeGenerator::new(backend));
//! let drained = drain.run().await?;
//! ```

pub mod config;
pub mod events;
pub mod linking;
pub mod narrative;
pub mod scheduler;
pub mod staleness;

// Re-export core types
pub use evidentia_core::*;

pub use config::{LinkingConfig, NarrativeConfig, SchedulerConfig};
pub use events::{ChangeSink, RecordingSink};
pub use linking::{
    LinkDecision, LinkRunSummary, LinkingEngine, ProjectLinkReport, RejectReason, SkipReason,
};
pub use narrative::{DrainSummary, NarrativeDrain, NarrativeQueue};
pub use scheduler::{PipelineScheduler, SchedulerEvent, SchedulerHandle};
pub use staleness::{compute_input_hash, Freshness, NarrativeRenderer, RenderedNarrative};
