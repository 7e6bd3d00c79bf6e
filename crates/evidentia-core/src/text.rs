//! Text sanitization and salient-term scoring.
//!
//! Everything here is pure and deterministic: the prefilter, the rule score of
//! the dual-gate filter and the narrative snippet builder all share these
//! functions so an item is scored identically wherever it is looked at.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::defaults;

static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

static REPLY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^on\b.{0,200}\bwrote:\s*$").unwrap());

static FORWARD_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^-{2,}\s*(original message|forwarded message)\s*-{2,}$").unwrap()
});

static SIGNATURE_DELIMITER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(--|__)\s*$").unwrap());

static SIGNOFF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^((best|kind|warm)\s+)?regards,?$|^cheers,?$|^thanks,?$|^sent from my\b|^get outlook for\b",
    )
    .unwrap()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Words longer than three characters that carry no topical signal.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "against", "also", "another", "anything", "back",
        "because", "been", "before", "being", "below", "between", "both", "cannot", "could",
        "does", "doing", "done", "down", "during", "each", "even", "every", "from", "further",
        "have", "having", "hello", "here", "hers", "himself", "into", "itself", "just", "know",
        "like", "made", "make", "many", "might", "more", "most", "much", "must", "need", "next",
        "once", "only", "other", "ours", "over", "please", "really", "regards", "same", "should",
        "since", "some", "still", "such", "sure", "take", "than", "thank", "thanks", "that",
        "their", "theirs", "them", "themselves", "then", "there", "these", "they", "thing",
        "things", "this", "those", "through", "today", "under", "until", "upon", "very", "want",
        "well", "were", "what", "when", "where", "which", "while", "will", "with", "within",
        "without", "would", "yesterday", "your", "yours", "yourself",
    ]
    .into_iter()
    .collect()
});

/// Clean raw evidence content for scoring and display.
///
/// Strips HTML (script/style bodies included), drops quoted reply lines and
/// reply headers, cuts forwarded/original-message tails and email signatures,
/// then collapses all whitespace to single spaces.
pub fn sanitize_content(raw: &str) -> String {
    let without_blocks = SCRIPT_STYLE.replace_all(raw, " ");
    let without_tags = HTML_TAG.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);

    let mut kept: Vec<&str> = Vec::new();
    for line in decoded.lines() {
        let trimmed = line.trim();
        if FORWARD_MARKER.is_match(trimmed)
            || SIGNATURE_DELIMITER.is_match(line)
            || SIGNOFF.is_match(trimmed)
        {
            break;
        }
        if trimmed.starts_with('>') || REPLY_HEADER.is_match(trimmed) {
            continue;
        }
        kept.push(trimmed);
    }

    WHITESPACE
        .replace_all(&kept.join(" "), " ")
        .trim()
        .to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Extract up to `max_terms` salient terms, most frequent first.
///
/// Punctuation is stripped, text is lowercased and split on whitespace.
/// Tokens of three characters or fewer and stopwords are dropped. Ties keep
/// first-seen order. Pure term frequency, no IDF.
pub fn extract_terms(text: &str, max_terms: usize) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect::<String>()
        .to_lowercase();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for token in cleaned.split_whitespace() {
        if token.chars().count() <= defaults::MIN_TERM_CHARS || STOPWORDS.contains(token) {
            continue;
        }
        let count = counts.entry(token).or_insert(0);
        if *count == 0 {
            order.push(token);
        }
        *count += 1;
    }

    // Vec::sort_by is stable, so equal counts stay in first-seen order.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order
        .into_iter()
        .take(max_terms)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two term collections, compared as sets.
///
/// Returns 0.0 when both are empty.
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let set_b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}

/// Truncate to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}
