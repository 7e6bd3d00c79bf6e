//! # evidentia-core
//!
//! Core types, traits, and abstractions for the evidentia evidence pipeline.
//!
//! This crate provides the data model shared by the linking pipeline and the
//! narrative queue, the repository and generation-backend traits that concrete
//! stores and LLM clients implement, and the pure text-scoring functions
//! (term extraction, Jaccard similarity, content sanitization, hashing).

pub mod defaults;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod models;
pub mod text;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use hashing::{content_hash, input_hash, short_id, EvidenceFingerprint};
pub use models::*;
pub use text::{extract_terms, jaccard, sanitize_content, truncate_chars};
pub use traits::*;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
