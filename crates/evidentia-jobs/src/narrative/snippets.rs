//! Snippet collection and eligibility for narrative generation.

use evidentia_core::{
    defaults, sanitize_content, short_id, truncate_chars, EvidenceItem, EvidenceSource,
    SystematicStep,
};
use evidentia_inference::{NarrativeSnippet, StepEvidence};

/// Snippets grouped by step plus the counts eligibility is judged on.
#[derive(Debug, Clone, Default)]
pub struct SnippetSet {
    /// Non-empty groups in step order; `Unknown` last.
    pub steps: Vec<StepEvidence>,
    /// Usable evidence items, before the per-step cap.
    pub item_count: usize,
    /// Distinct named steps among the usable items.
    pub distinct_steps: usize,
}

impl SnippetSet {
    pub fn snippet_count(&self) -> usize {
        self.steps.iter().map(|s| s.snippets.len()).sum()
    }

    pub fn is_eligible(&self) -> bool {
        is_eligible(self.distinct_steps, self.item_count)
    }
}

/// At least two distinct steps, or at least three items.
pub fn is_eligible(distinct_steps: usize, item_count: usize) -> bool {
    distinct_steps >= defaults::MIN_DISTINCT_STEPS || item_count >= defaults::MIN_EVIDENCE_ITEMS
}

/// Collect up to `per_step` snippets per step, most recent first.
///
/// Deleted items, file attachments and items whose sanitized content is
/// empty are not usable.
pub fn collect_snippets(items: &[EvidenceItem], per_step: usize, max_chars: usize) -> SnippetSet {
    let mut usable: Vec<(&EvidenceItem, String)> = items
        .iter()
        .filter(|item| !item.is_deleted() && item.source != EvidenceSource::File)
        .filter_map(|item| {
            let text = sanitize_content(&item.content);
            (!text.is_empty()).then_some((item, text))
        })
        .collect();
    usable.sort_by(|(a, _), (b, _)| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

    let mut set = SnippetSet {
        item_count: usable.len(),
        ..Default::default()
    };

    let groups = SystematicStep::ORDERED
        .into_iter()
        .chain(std::iter::once(SystematicStep::Unknown));
    for step in groups {
        let snippets: Vec<NarrativeSnippet> = usable
            .iter()
            .filter(|(item, _)| item.systematic_step == step)
            .take(per_step)
            .map(|(item, text)| NarrativeSnippet {
                id: short_id(&item.id),
                date: item.created_at.format("%Y-%m-%d").to_string(),
                source: item.source.as_str().to_string(),
                text: truncate_chars(text, max_chars),
            })
            .collect();
        if snippets.is_empty() {
            continue;
        }
        if step != SystematicStep::Unknown {
            set.distinct_steps += 1;
        }
        set.steps.push(StepEvidence { step, snippets });
    }
    set
}
