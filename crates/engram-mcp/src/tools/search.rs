//! Search tools
//!
//! The unified query surface over code, experiences, values, commits,
//! and memories. Every tool accepts a `search_mode` of semantic,
//! keyword, or hybrid; unknown modes are rejected.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use engram_core::observation::{Domain, OutcomeStatus, Strategy};
use engram_core::search::{SearchMode, SearcherOps};
use engram_core::Axis;

use crate::protocol::types::ToolDescription;
use crate::server::Services;

use super::memory::map_search_error;
use super::{error_response, opt_str, parse_limit, preview, require_str};

const CODE_PREVIEW: usize = 300;
const TEXT_PREVIEW: usize = 150;

// ============================================================================
// SCHEMAS
// ============================================================================

fn mode_property() -> Value {
    json!({
        "type": "string",
        "enum": SearchMode::names(),
        "default": "semantic",
        "description": "Retrieval mode"
    })
}

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "search_code".to_string(),
            description: "Search indexed code units".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "project": {"type": "string"},
                    "language": {"type": "string"},
                    "unit_type": {"type": "string", "enum": ["function", "class", "method"]},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "search_mode": mode_property()
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "search_experiences".to_string(),
            description: "Search persisted GHAP experiences on one semantic axis".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "axis": {
                        "type": "string",
                        "enum": Axis::names(),
                        "default": "full",
                        "description": "Semantic projection to search"
                    },
                    "domain": {"type": "string", "enum": Domain::names()},
                    "strategy": {"type": "string", "enum": Strategy::names()},
                    "outcome": {"type": "string", "enum": OutcomeStatus::names()},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "search_mode": mode_property()
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "search_values".to_string(),
            description: "Search validated values (principles)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "axis": {"type": "string", "enum": Axis::names()},
                    "limit": {"type": "integer", "default": 5, "minimum": 1, "maximum": 100},
                    "search_mode": mode_property()
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "search_commits".to_string(),
            description: "Search indexed git commits".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "author": {"type": "string"},
                    "since": {"type": "string", "description": "ISO 8601 lower bound"},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "search_mode": mode_property()
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "search_memories".to_string(),
            description: "Search stored memories".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "category": {"type": "string", "enum": engram_core::MemoryCategory::names()},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "search_mode": mode_property()
                },
                "required": ["query"]
            }),
        },
    ]
}

// ============================================================================
// SHARED PARSING
// ============================================================================

fn parse_mode(args: &Value) -> Result<SearchMode, Value> {
    match opt_str(args, "search_mode") {
        Some(raw) => {
            SearchMode::parse(&raw).map_err(|e| error_response("validation_error", e.to_string()))
        }
        None => Ok(SearchMode::Semantic),
    }
}

fn parse_enum<T>(
    args: &Value,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    valid: &[&str],
) -> Result<Option<T>, Value> {
    match opt_str(args, key) {
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
            error_response(
                "validation_error",
                format!("Invalid {key} '{raw}'. Valid: {}", valid.join(", ")),
            )
        }),
        None => Ok(None),
    }
}

// ============================================================================
// TOOLS
// ============================================================================

pub async fn search_code(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 10) {
        Ok(l) => l,
        Err(e) => return e,
    };
    let mode = match parse_mode(args) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let project = opt_str(args, "project");
    let language = opt_str(args, "language");
    let unit_type = opt_str(args, "unit_type");

    match services
        .searcher
        .search_code(
            &query,
            project.as_deref(),
            language.as_deref(),
            unit_type.as_deref(),
            limit,
            mode,
        )
        .await
    {
        Ok(results) => {
            let rows: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "qualified_name": r.qualified_name,
                        "file_path": r.file_path,
                        "language": r.language,
                        "unit_type": r.unit_type,
                        "lines": format!("{}-{}", r.line_start, r.line_end),
                        "code": preview(&r.code, CODE_PREVIEW),
                        "score": r.score,
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(e) => map_search_error(e),
    }
}

pub async fn search_experiences(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let axis = match opt_str(args, "axis") {
        Some(raw) => match Axis::parse(&raw) {
            Some(axis) => axis,
            None => {
                return error_response(
                    "validation_error",
                    format!("Invalid axis '{raw}'. Valid axes: {}", Axis::names().join(", ")),
                )
            }
        },
        None => Axis::Full,
    };
    let domain = match parse_enum(args, "domain", Domain::parse, &Domain::names()) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let strategy = match parse_enum(args, "strategy", Strategy::parse, &Strategy::names()) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let outcome = match parse_enum(args, "outcome", OutcomeStatus::parse, &OutcomeStatus::names())
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 10) {
        Ok(l) => l,
        Err(e) => return e,
    };
    let mode = match parse_mode(args) {
        Ok(m) => m,
        Err(e) => return e,
    };

    match services
        .searcher
        .search_experiences(&query, axis, domain, strategy, outcome, limit, mode)
        .await
    {
        Ok(results) => {
            let rows: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "ghap_id": r.ghap_id,
                        "domain": r.domain,
                        "strategy": r.strategy,
                        "goal": preview(&r.goal, TEXT_PREVIEW),
                        "outcome_status": r.outcome_status,
                        "outcome_result": preview(&r.outcome_result, TEXT_PREVIEW),
                        "confidence_tier": r.confidence_tier,
                        "score": r.score,
                    })
                })
                .collect();
            json!({"axis": axis.as_str(), "results": rows, "count": rows.len()})
        }
        Err(e) => map_search_error(e),
    }
}

pub async fn search_values(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let axis = match parse_enum(args, "axis", Axis::parse, &Axis::names()) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 5) {
        Ok(l) => l,
        Err(e) => return e,
    };
    let mode = match parse_mode(args) {
        Ok(m) => m,
        Err(e) => return e,
    };

    match services.searcher.search_values(&query, axis, limit, mode).await {
        Ok(results) => {
            let rows: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "text": r.text,
                        "axis": r.axis,
                        "cluster_id": r.cluster_id,
                        "cluster_size": r.cluster_size,
                        "score": r.score,
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(e) => map_search_error(e),
    }
}

pub async fn search_commits(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let since = match opt_str(args, "since") {
        Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                return error_response(
                    "validation_error",
                    format!("Invalid date format for 'since': {raw}. Expected ISO 8601"),
                )
            }
        },
        None => None,
    };
    let author = opt_str(args, "author");
    let limit = match parse_limit(args, 10) {
        Ok(l) => l,
        Err(e) => return e,
    };
    let mode = match parse_mode(args) {
        Ok(m) => m,
        Err(e) => return e,
    };

    match services
        .searcher
        .search_commits(&query, author.as_deref(), since, limit, mode)
        .await
    {
        Ok(results) => {
            let rows: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "sha": preview(&r.sha, 12),
                        "message": preview(&r.message, TEXT_PREVIEW),
                        "author": r.author,
                        "committed_at": r.committed_at.map(|t| t.to_rfc3339()),
                        "score": r.score,
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(e) => map_search_error(e),
    }
}

pub async fn search_memories(services: &Services, args: &Value) -> Value {
    super::memory::retrieve_memories(services, args).await
}

// ============================================================================
// TESTS
// ============================================================================
