//! MCP tools
//!
//! One module per tool family. Every tool returns a JSON value: the
//! result object on success, or `{"error": {"type", "message"}}` on
//! failure. Responses stay lean - confirmations carry ids and
//! timestamps, not whole entries.

pub mod context;
pub mod ghap;
pub mod learning;
pub mod memory;
pub mod search;

use serde_json::{json, Value};

use crate::protocol::types::ToolDescription;
use crate::server::Services;

// ============================================================================
// ERROR ENVELOPE
// ============================================================================

/// Build the standard error envelope
pub fn error_response(error_type: &str, message: impl AsRef<str>) -> Value {
    json!({"error": {"type": error_type, "message": message.as_ref()}})
}

/// True when a tool response is an error envelope
pub fn is_error(value: &Value) -> bool {
    value.get("error").is_some()
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

/// A required string argument; empty/whitespace is a validation error.
pub fn require_str(args: &Value, key: &str) -> Result<String, Value> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        Some(_) => Err(error_response(
            "validation_error",
            format!("Field '{key}' cannot be empty"),
        )),
        None => Err(error_response(
            "validation_error",
            format!("Field '{key}' is required"),
        )),
    }
}

/// An optional string argument; null and absent are `None`.
pub fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Enforce a character limit on one field
pub fn check_len(field: &str, value: &str, max: usize) -> Result<(), Value> {
    if value.chars().count() > max {
        return Err(error_response(
            "validation_error",
            format!(
                "Field '{field}' exceeds {max} character limit ({} chars)",
                value.chars().count()
            ),
        ));
    }
    Ok(())
}

/// List-shaped tools take no retrieval mode; passing one is an error,
/// never a silent fallback to semantic.
pub fn reject_search_mode(args: &Value, tool: &str) -> Result<(), Value> {
    if args.get("search_mode").is_some() {
        return Err(error_response(
            "validation_error",
            format!("'{tool}' does not accept 'search_mode'"),
        ));
    }
    Ok(())
}

/// A limit argument validated to `1..=100`
pub fn parse_limit(args: &Value, default: u64) -> Result<usize, Value> {
    let limit = args.get("limit").and_then(|v| v.as_i64()).unwrap_or(default as i64);
    if !(1..=100).contains(&limit) {
        return Err(error_response(
            "validation_error",
            format!("Limit must be between 1 and 100 (got {limit})"),
        ));
    }
    Ok(limit as usize)
}

/// Shorten a string for a list-shaped response
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Every tool descriptor, in listing order
pub fn all_tools() -> Vec<ToolDescription> {
    let mut tools = ghap::descriptors();
    tools.extend(memory::descriptors());
    tools.extend(search::descriptors());
    tools.extend(learning::descriptors());
    tools.extend(context::descriptors());
    tools
}

/// Dispatch one tool call; `None` for an unknown tool name.
pub async fn dispatch(services: &Services, name: &str, args: Value) -> Option<Value> {
    let result = match name {
        "start_ghap" => ghap::start_ghap(services, &args).await,
        "update_ghap" => ghap::update_ghap(services, &args).await,
        "resolve_ghap" => ghap::resolve_ghap(services, &args).await,
        "get_active_ghap" => ghap::get_active_ghap(services).await,
        "list_ghap_entries" => ghap::list_ghap_entries(services, &args).await,
        "store_memory" => memory::store_memory(services, &args).await,
        "retrieve_memories" => memory::retrieve_memories(services, &args).await,
        "list_memories" => memory::list_memories(services, &args).await,
        "delete_memory" => memory::delete_memory(services, &args).await,
        "search_code" => search::search_code(services, &args).await,
        "search_experiences" => search::search_experiences(services, &args).await,
        "search_values" => search::search_values(services, &args).await,
        "search_commits" => search::search_commits(services, &args).await,
        "search_memories" => search::search_memories(services, &args).await,
        "get_clusters" => learning::get_clusters(services, &args).await,
        "get_cluster_members" => learning::get_cluster_members(services, &args).await,
        "validate_value" => learning::validate_value(services, &args).await,
        "store_value" => learning::store_value(services, &args).await,
        "list_values" => learning::list_values(services, &args).await,
        "assemble_context" => context::assemble_context(services, &args).await,
        "get_premortem_context" => context::get_premortem_context(services, &args).await,
        _ => return None,
    };
    Some(result)
}
