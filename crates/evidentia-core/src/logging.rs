//! Structured logging conventions for evidentia.
//!
//! Spans and events carry `subsystem`, `component` and `op` fields so log
//! aggregation can slice every run the same way. The `subsystem` value is
//! always one of the constants in [`subsystem`].
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run aborted or store unavailable, requires operator attention |
//! | WARN  | Recoverable issue: classifier failure, conflict, orphaned job |
//! | INFO  | Run completions and summaries |
//! | DEBUG | Decision points: gate rejections, budget checks, eligibility |
//! | TRACE | Per-term and per-candidate scoring detail |

/// Values of the `subsystem` field.
pub mod subsystem {
    /// Evidence-to-activity linking runs.
    pub const LINKING: &str = "linking";
    /// Narrative queue, drain and rendering.
    pub const NARRATIVE: &str = "narrative";
    /// Model backends and prompt handling.
    pub const INFERENCE: &str = "inference";
    pub const DB: &str = "db";
    pub const SCHEDULER: &str = "scheduler";

    pub const ALL: [&str; 5] = [LINKING, NARRATIVE, INFERENCE, DB, SCHEDULER];
}
