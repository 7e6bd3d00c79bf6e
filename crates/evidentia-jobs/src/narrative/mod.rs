//! Narrative synthesis job queue.

pub mod drain;
pub mod queue;
pub mod snippets;

pub use drain::{placeholder, DrainSummary, NarrativeDrain, SKIP_BUDGET_EXCEEDED, SKIP_ORPHANED};
pub use queue::NarrativeQueue;
pub use snippets::{collect_snippets, is_eligible, SnippetSet};
