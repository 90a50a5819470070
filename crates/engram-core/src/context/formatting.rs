//! Markdown rendering for context items

use crate::collections::Axis;
use crate::search::{CodeResult, CommitResult, ExperienceResult, MemoryResult, ValueResult};

use super::models::{ContextItem, SourceKind};

// ============================================================================
// PER-RESULT FORMATTING
// ============================================================================

pub fn format_memory(result: &MemoryResult) -> String {
    format!(
        "**Memory**: {}\n*Category: {}, Importance: {:.2}*",
        result.content, result.category, result.importance
    )
}

pub fn format_code(result: &CodeResult) -> String {
    let unit_type = capitalize(&result.unit_type);
    let mut out = format!(
        "**{}** `{}` in `{}:{}`\n```{}\n{}\n",
        unit_type,
        result.qualified_name,
        result.file_path,
        result.line_start,
        result.language,
        result.code
    );
    if let Some(docstring) = &result.docstring {
        out.push_str(&format!("\"\"\"{docstring}\"\"\"\n"));
    }
    out.push_str("```");
    out
}

pub fn format_experience(result: &ExperienceResult) -> String {
    let mut out = format!("**Experience**: {} | {}\n", result.domain, result.strategy);
    out.push_str(&format!("- **Goal**: {}\n", result.goal));
    out.push_str(&format!("- **Hypothesis**: {}\n", result.hypothesis));
    out.push_str(&format!("- **Action**: {}\n", result.action));
    out.push_str(&format!("- **Prediction**: {}\n", result.prediction));
    out.push_str(&format!(
        "- **Outcome**: {} - {}\n",
        result.outcome_status, result.outcome_result
    ));
    if let Some(surprise) = &result.surprise {
        out.push_str(&format!("- **Surprise**: {surprise}\n"));
    }
    if let Some(lesson) = &result.lesson {
        out.push_str(&format!("- **Lesson**: {lesson}\n"));
    }
    out
}

pub fn format_value(result: &ValueResult) -> String {
    format!(
        "**Value** ({}, cluster size: {}):\n{}",
        result.axis, result.cluster_size, result.text
    )
}

pub fn format_commit(result: &CommitResult) -> String {
    let short_sha = &result.sha[..result.sha.len().min(7)];
    let timestamp = result
        .committed_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    let mut out = format!(
        "**Commit** `{short_sha}` by {} on {timestamp}\n{}\n",
        result.author, result.message
    );
    if !result.files_changed.is_empty() {
        let mut file_list = result
            .files_changed
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if result.files_changed.len() > 3 {
            file_list.push_str(&format!(", ... ({} more)", result.files_changed.len() - 3));
        }
        out.push_str(&format!("*Files: {file_list}*"));
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ============================================================================
// DOCUMENT ASSEMBLY
// ============================================================================

/// Compose the standard context document: one level-1 heading, one
/// level-2 section per non-empty source, a footer with counts.
pub fn assemble_markdown(sections: &[(SourceKind, Vec<ContextItem>)]) -> String {
    let mut parts = vec!["# Context\n".to_string()];
    let mut total_items = 0;
    let mut sources_count = 0;

    for (source, items) in sections {
        if items.is_empty() {
            continue;
        }
        parts.push(format!("\n## {}\n", source.title()));
        for item in items {
            parts.push(format!("\n{}\n", item.content));
            total_items += 1;
        }
        sources_count += 1;
    }

    parts.push(format!(
        "\n---\n*{total_items} items from {sources_count} sources*"
    ));
    parts.join("\n")
}

/// Compose the premortem document: experiences grouped into named
/// sections by axis, then the relevant principles.
pub fn assemble_premortem_markdown(
    experiences: &[ContextItem],
    values: &[ContextItem],
    domain: &str,
    strategy: Option<&str>,
) -> String {
    let mut header = format!("# Premortem: {domain}");
    if let Some(strategy) = strategy {
        header.push_str(&format!(" with {strategy}"));
    }
    let mut parts = vec![header + "\n"];

    const SECTIONS: [(Axis, &str); 4] = [
        (Axis::Full, "Common Failures"),
        (Axis::Strategy, "Strategy Performance"),
        (Axis::Surprise, "Unexpected Outcomes"),
        (Axis::RootCause, "Root Causes to Watch"),
    ];

    let mut experience_count = 0;
    for (axis, title) in SECTIONS {
        let axis_items: Vec<&ContextItem> = experiences
            .iter()
            .filter(|item| item.axis == Some(axis))
            .collect();
        if axis_items.is_empty() {
            continue;
        }
        parts.push(format!("\n## {title}\n"));
        for item in axis_items {
            parts.push(format!("\n{}\n", item.content));
            experience_count += 1;
        }
    }

    if !values.is_empty() {
        parts.push("\n## Relevant Principles\n".to_string());
        for item in values {
            parts.push(format!("\n{}\n", item.content));
        }
    }

    parts.push(format!(
        "\n---\n*Based on {experience_count} past experiences*"
    ));
    parts.join("\n")
}
