//! Cross-source deduplication
//!
//! Exact duplicates collide on their [`DedupKey`]; near-duplicates are
//! caught by a sequence-similarity pass over short content. In either
//! collision the higher-relevance item survives.

use similar::TextDiff;

use super::models::{ContextConfig, ContextItem};

/// Deduplicate context items across sources. The result is sorted by
/// relevance descending.
pub fn deduplicate_items(items: Vec<ContextItem>, config: &ContextConfig) -> Vec<ContextItem> {
    if items.is_empty() {
        return vec![];
    }

    let mut seen: Vec<ContextItem> = Vec::with_capacity(items.len());

    for item in items {
        if let Some(pos) = seen.iter().position(|s| s.dedup_key == item.dedup_key) {
            if item.relevance > seen[pos].relevance {
                seen[pos] = item;
            }
            continue;
        }

        if let Some(pos) = find_fuzzy_duplicate(&item, &seen, config) {
            if item.relevance > seen[pos].relevance {
                seen.remove(pos);
                seen.push(item);
            }
            continue;
        }

        seen.push(item);
    }

    seen.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    seen
}

/// Index of a fuzzy duplicate of `item` in `candidates`, if any.
///
/// Only items at or below the fuzzy length cap are compared, and only
/// when their lengths are within 20% of each other.
fn find_fuzzy_duplicate(
    item: &ContextItem,
    candidates: &[ContextItem],
    config: &ContextConfig,
) -> Option<usize> {
    let item_len = item.content.len();
    if item_len > config.max_fuzzy_content_length {
        return None;
    }
    let min_len = (item_len as f32 * 0.8) as usize;
    let max_len = (item_len as f32 * 1.2) as usize;

    for (pos, candidate) in candidates.iter().enumerate() {
        let candidate_len = candidate.content.len();
        if candidate_len < min_len || candidate_len > max_len {
            continue;
        }
        if candidate_len > config.max_fuzzy_content_length {
            continue;
        }

        let ratio = TextDiff::from_chars(item.content.as_str(), candidate.content.as_str()).ratio();
        if ratio >= config.similarity_threshold {
            return Some(pos);
        }
    }
    None
}
