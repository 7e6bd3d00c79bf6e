//! Evidence classification and linking.

pub mod budget;
pub mod decision;
pub mod engine;
pub mod prefilter;

pub use budget::{count_since, Gatekeeper, ProjectBudget, Selection, SkipReason};
pub use decision::{decide, gate, match_activity, BatchDecisions, LinkDecision};
pub use engine::{LinkRunSummary, LinkingEngine, ProjectLinkReport};
pub use prefilter::{ActivityTerms, Candidate, Prefilter, RejectReason};
