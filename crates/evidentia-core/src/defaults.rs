//! Centralized default constants for the evidentia pipeline.
//!
//! **This module is the single source of truth** for all shared default values.
//! Every crate references these constants instead of defining its own magic
//! numbers. Environment overrides are applied by the `from_env` constructors
//! of the config types that consume them.

// =============================================================================
// TERM EXTRACTION
// =============================================================================

/// Default number of salient terms extracted from a text.
pub const TOP_TERMS: usize = 5;

/// Number of evidence terms included in each classifier summary.
pub const SUMMARY_TERMS: usize = 3;

/// Tokens at or below this many characters are discarded.
pub const MIN_TERM_CHARS: usize = 3;

// =============================================================================
// PREFILTER
// =============================================================================

/// Minimum sanitized content length (characters) for an evidence item.
pub const MIN_CONTENT_CHARS: usize = 20;

/// Evidence older than this is ignored unless a recent activity exists.
pub const RECENCY_WINDOW_DAYS: i64 = 60;

/// An activity created within this many days re-opens older evidence.
pub const BACKFILL_WINDOW_DAYS: i64 = 14;

// =============================================================================
// LINKING BUDGETS
// =============================================================================

/// Maximum link attempts per project in a rolling 24h window.
pub const DAILY_LINK_CAP: i64 = 100;

/// Maximum candidates sent to the classifier per project per run.
pub const LINK_BATCH_LIMIT: usize = 25;

/// Successful links are re-examined after this many hours.
pub const SUCCESS_COOLDOWN_HOURS: i64 = 24;

/// Unlinked or failed attempts are retried after this many minutes.
pub const RETRY_COOLDOWN_MINUTES: i64 = 60;

/// Rolling window for daily budgets, in hours.
pub const BUDGET_WINDOW_HOURS: i64 = 24;

/// Minimum rule score (inclusive) for a proposed link to be accepted.
pub const RULE_SCORE_THRESHOLD: f64 = 0.10;

/// Projects linked concurrently within one run.
pub const LINK_PROJECT_CONCURRENCY: usize = 4;

// =============================================================================
// PROMPT SIZING
// =============================================================================

/// Hypothesis characters included in prompts and in the input hash.
pub const HYPOTHESIS_MAX_CHARS: usize = 600;

/// Characters kept from an activity name in prompts.
pub const ACTIVITY_NAME_MAX_CHARS: usize = 120;

/// Characters kept from an activity uncertainty statement in prompts.
pub const ACTIVITY_UNCERTAINTY_MAX_CHARS: usize = 300;

/// Evidence snippet length in classifier summaries.
pub const CLASSIFIER_SNIPPET_CHARS: usize = 200;

/// Maximum characters of a classifier link reason.
pub const LINK_REASON_MAX_CHARS: usize = 110;

// =============================================================================
// NARRATIVES
// =============================================================================

/// Maximum narrative jobs drained per run.
pub const NARRATIVE_BATCH_SIZE: i64 = 10;

/// Evidence snippets gathered per systematic step.
pub const SNIPPETS_PER_STEP: usize = 3;

/// Estimated snippets consumed by one narrative generation.
pub const SNIPPETS_PER_NARRATIVE: i64 = 15;

/// Daily snippet budget per project.
pub const DAILY_SNIPPET_CAP: i64 = 80;

/// Characters kept from each narrative snippet.
pub const NARRATIVE_SNIPPET_CHARS: usize = 280;

/// Distinct systematic steps that make an activity eligible.
pub const MIN_DISTINCT_STEPS: usize = 2;

/// Total evidence items that make an activity eligible.
pub const MIN_EVIDENCE_ITEMS: usize = 3;

/// Narrative cached for activities without enough evidence.
pub const PLACEHOLDER_NARRATIVE: &str = "Not enough evidence to summarize yet.";

/// Priority used when the render path re-enqueues a stale narrative.
pub const STALE_REFRESH_PRIORITY: i32 = 5;

/// Priority used when linking changes an activity's evidence set.
pub const LINK_CHANGE_PRIORITY: i32 = 1;

/// Seconds after which an unreleased job claim is considered abandoned.
pub const NARRATIVE_CLAIM_LEASE_SECS: i64 = 300;

/// Narrative jobs generated concurrently across projects.
pub const NARRATIVE_PROJECT_CONCURRENCY: usize = 4;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "gpt-oss:20b";

/// HTTP timeout for a single generation request in seconds.
///
/// Callers apply their own, tighter deadlines on top of this.
pub const GEN_TIMEOUT_SECS: u64 = 60;

/// Timeout for one classification batch in seconds.
pub const CLASSIFY_TIMEOUT_SECS: u64 = 10;

/// Timeout for one narrative generation in seconds.
pub const NARRATIVE_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Default interval between scheduled linking runs in seconds.
pub const LINK_INTERVAL_SECS: u64 = 900;

/// Default interval between scheduled narrative drains in seconds.
pub const NARRATIVE_INTERVAL_SECS: u64 = 300;

/// Default event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_constants_are_consistent() {
        assert!(LINK_BATCH_LIMIT as i64 <= DAILY_LINK_CAP);
        assert!(BACKFILL_WINDOW_DAYS < RECENCY_WINDOW_DAYS);
        assert!(RETRY_COOLDOWN_MINUTES < SUCCESS_COOLDOWN_HOURS * 60);
        assert!(SNIPPETS_PER_NARRATIVE <= DAILY_SNIPPET_CAP);
    }

    #[test]
    fn test_snippet_estimate_covers_every_step() {
        assert_eq!(SNIPPETS_PER_NARRATIVE, (SNIPPETS_PER_STEP * 5) as i64);
    }
}
