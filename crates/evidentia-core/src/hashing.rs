//! Content and narrative input hashing.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::defaults;
use crate::models::{CoreActivity, EvidenceItem};
use crate::text::truncate_chars;

/// Hash of an evidence item's raw content, `blake3:<hex>`.
pub fn content_hash(content: &str) -> String {
    let hash = blake3::hash(content.as_bytes());
    format!("blake3:{}", hash.to_hex())
}

/// First 8 characters of a UUID, used to reference evidence in prompts.
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// One linked evidence item as it contributes to a narrative input hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EvidenceFingerprint {
    pub evidence_id: Uuid,
    pub content_hash: String,
}

impl EvidenceFingerprint {
    /// Fingerprint an item from its current content.
    pub fn of(item: &EvidenceItem) -> Self {
        Self {
            evidence_id: item.id,
            content_hash: content_hash(&item.content),
        }
    }
}

#[derive(Serialize)]
struct CanonicalActivity<'a> {
    name: &'a str,
    uncertainty: &'a str,
}

#[derive(Serialize)]
struct CanonicalInput<'a> {
    hypothesis: String,
    activity: CanonicalActivity<'a>,
    evidence: Vec<EvidenceFingerprint>,
}

/// SHA-256 hex digest over everything a narrative is generated from.
///
/// The hypothesis is truncated to [`defaults::HYPOTHESIS_MAX_CHARS`] and the
/// evidence list is sorted by id, so the result does not depend on the order
/// the store returned rows in.
pub fn input_hash(
    hypothesis: Option<&str>,
    activity: &CoreActivity,
    evidence: &[EvidenceFingerprint],
) -> String {
    let mut sorted = evidence.to_vec();
    sorted.sort();

    let canonical = CanonicalInput {
        hypothesis: truncate_chars(hypothesis.unwrap_or(""), defaults::HYPOTHESIS_MAX_CHARS),
        activity: CanonicalActivity {
            name: &activity.name,
            uncertainty: &activity.uncertainty,
        },
        evidence: sorted,
    };

    // Struct fields serialize in declaration order, which keeps this stable.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
