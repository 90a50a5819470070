//! Token estimation and budget distribution
//!
//! The estimate is the 4-characters-per-token heuristic; truncation
//! prefers to cut on a newline boundary within the last 20% of the
//! truncated prefix.

use std::collections::BTreeMap;

use super::models::{ContextConfig, ContextError, ContextItem, SourceKind};

/// Estimated token count for a text
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Truncate `text` to approximately `max_tokens`, preferring a newline
/// boundary near the end of the kept prefix. Cuts are char-safe.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.len() <= max_chars {
        return text.to_string();
    }

    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];

    if let Some(last_newline) = truncated.rfind('\n') {
        if last_newline as f32 > max_chars as f32 * 0.8 {
            return truncated[..last_newline].to_string();
        }
    }
    truncated.to_string()
}

/// Distribute a token budget across the requested sources by the
/// configured weights, renormalised over the request.
pub fn distribute_budget(
    sources: &[SourceKind],
    max_tokens: usize,
    config: &ContextConfig,
) -> Result<BTreeMap<SourceKind, usize>, ContextError> {
    if max_tokens < 1 {
        return Err(ContextError::InvalidBudget(
            "max_tokens must be positive".to_string(),
        ));
    }
    if max_tokens > config.max_budget_tokens {
        return Err(ContextError::InvalidBudget(format!(
            "max_tokens {max_tokens} exceeds maximum of {}",
            config.max_budget_tokens
        )));
    }

    let total_weight: f32 = sources.iter().map(|&s| config.weight(s)).sum();
    Ok(sources
        .iter()
        .map(|&source| {
            let share = (config.weight(source) / total_weight) * max_tokens as f32;
            (source, share as usize)
        })
        .collect())
}

/// Cap one item's content to its per-item limit (a fraction of the
/// source budget). Truncated content is annotated per source kind.
pub fn cap_item_tokens(
    item: &ContextItem,
    source_budget: usize,
    config: &ContextConfig,
) -> (String, bool) {
    let max_item_tokens = (source_budget as f32 * config.max_item_fraction) as usize;
    if estimate_tokens(&item.content) <= max_item_tokens {
        return (item.content.clone(), false);
    }

    let truncated = truncate_to_tokens(&item.content, max_item_tokens);
    let note = match item.source {
        SourceKind::Code => format!(
            "\n\n*(truncated, see full at {})*",
            item.locator.as_deref().unwrap_or("unknown")
        ),
        SourceKind::Experiences => {
            format!("\n\n*(truncated, full experience ID: {})*", item.id)
        }
        _ => "\n\n*(truncated)*".to_string(),
    };
    (format!("{truncated}...{note}"), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::DedupKey;

    fn item(source: SourceKind, content: &str) -> ContextItem {
        ContextItem {
            source,
            content: content.to_string(),
            relevance: 0.5,
            id: "item-1".to_string(),
            dedup_key: DedupKey::Content(1),
            axis: None,
            locator: Some("src/lib.rs:10".to_string()),
        }
    }

    #[test]
    fn test_estimate_four_chars_per_token() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_truncate_noop_when_fits() {
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }

    #[test]
    fn test_truncate_prefers_late_newline() {
        // Newline at 90% of the cut point: preferred
        let text = format!("{}\n{}", "a".repeat(360), "b".repeat(200));
        let result = truncate_to_tokens(&text, 100); // 400 chars
        assert_eq!(result, "a".repeat(360));
    }

    #[test]
    fn test_truncate_ignores_early_newline() {
        // Newline at 25% of the cut point: plain cut wins
        let text = format!("{}\n{}", "a".repeat(100), "b".repeat(500));
        let result = truncate_to_tokens(&text, 100);
        assert_eq!(result.len(), 400);
    }

    #[test]
    fn test_truncate_char_boundary_safe() {
        let text = "é".repeat(1000); // 2 bytes per char
        let result = truncate_to_tokens(&text, 100);
        assert!(result.len() <= 400);
    }

    #[test]
    fn test_distribute_budget_renormalises() {
        let config = ContextConfig::default();
        // memories 0.3 and code 0.3 renormalise to half each
        let budget =
            distribute_budget(&[SourceKind::Memories, SourceKind::Code], 1000, &config).unwrap();
        assert_eq!(budget[&SourceKind::Memories], 500);
        assert_eq!(budget[&SourceKind::Code], 500);

        // Uneven pair: memories 0.3 vs commits 0.1
        let budget =
            distribute_budget(&[SourceKind::Memories, SourceKind::Commits], 1000, &config).unwrap();
        assert_eq!(budget[&SourceKind::Memories], 750);
        assert_eq!(budget[&SourceKind::Commits], 250);
    }

    #[test]
    fn test_distribute_budget_bounds() {
        let config = ContextConfig::default();
        assert!(distribute_budget(&[SourceKind::Code], 0, &config).is_err());
        assert!(distribute_budget(&[SourceKind::Code], 100_001, &config).is_err());
        assert!(distribute_budget(&[SourceKind::Code], 100_000, &config).is_ok());
    }

    #[test]
    fn test_cap_item_within_limit_untouched() {
        let config = ContextConfig::default();
        let it = item(SourceKind::Memories, "short content");
        let (content, truncated) = cap_item_tokens(&it, 1000, &config);
        assert_eq!(content, "short content");
        assert!(!truncated);
    }

    #[test]
    fn test_cap_item_annotates_code() {
        let config = ContextConfig::default();
        let it = item(SourceKind::Code, &"x".repeat(4000));
        // per-item cap: 100 * 0.25 * 4 chars = 100 chars
        let (content, truncated) = cap_item_tokens(&it, 100, &config);
        assert!(truncated);
        assert!(content.contains("*(truncated, see full at src/lib.rs:10)*"));
    }

    #[test]
    fn test_cap_item_annotates_experience_with_id() {
        let config = ContextConfig::default();
        let it = item(SourceKind::Experiences, &"x".repeat(4000));
        let (content, truncated) = cap_item_tokens(&it, 100, &config);
        assert!(truncated);
        assert!(content.contains("*(truncated, full experience ID: item-1)*"));
    }

    #[test]
    fn test_cap_item_generic_annotation() {
        let config = ContextConfig::default();
        let it = item(SourceKind::Memories, &"x".repeat(4000));
        let (content, truncated) = cap_item_tokens(&it, 100, &config);
        assert!(truncated);
        assert!(content.ends_with("*(truncated)*"));
    }
}
