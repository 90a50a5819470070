//! Memory tools
//!
//! Store, retrieve, list, and delete free-form memories.

use serde_json::{json, Value};
use tracing::error;

use engram_core::memories::{MemoryCategory, MemoryError};
use engram_core::search::{SearchError, SearchMode, SearcherOps};

use crate::protocol::types::ToolDescription;
use crate::server::Services;

use super::{check_len, error_response, opt_str, parse_limit, preview, require_str};

const MAX_CONTENT_LEN: usize = 10_000;
const CONTENT_PREVIEW: usize = 200;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "store_memory".to_string(),
            description: "Store a free-form memory for later retrieval".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The memory content"},
                    "category": {
                        "type": "string",
                        "enum": MemoryCategory::names(),
                        "description": "Memory category"
                    },
                    "importance": {
                        "type": "number",
                        "minimum": 0.0,
                        "maximum": 1.0,
                        "default": 0.5
                    },
                    "tags": {"type": "array", "items": {"type": "string"}, "default": []}
                },
                "required": ["content", "category"]
            }),
        },
        ToolDescription {
            name: "retrieve_memories".to_string(),
            description: "Search stored memories".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "category": {"type": "string", "enum": MemoryCategory::names()},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "search_mode": {
                        "type": "string",
                        "enum": SearchMode::names(),
                        "default": "semantic"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDescription {
            name: "list_memories".to_string(),
            description: "List stored memories, newest first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string", "enum": MemoryCategory::names()},
                    "limit": {"type": "integer", "default": 20, "minimum": 1, "maximum": 100}
                }
            }),
        },
        ToolDescription {
            name: "delete_memory".to_string(),
            description: "Delete a memory by id".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Memory UUID"}
                },
                "required": ["id"]
            }),
        },
    ]
}

fn parse_category(args: &Value) -> Result<Option<MemoryCategory>, Value> {
    match opt_str(args, "category") {
        Some(raw) => MemoryCategory::parse(&raw).map(Some).ok_or_else(|| {
            error_response(
                "validation_error",
                format!(
                    "Invalid category '{raw}'. Valid: {}",
                    MemoryCategory::names().join(", ")
                ),
            )
        }),
        None => Ok(None),
    }
}

fn map_memory_error(e: MemoryError) -> Value {
    match e {
        MemoryError::InvalidId(id) => {
            error_response("validation_error", format!("Invalid memory id '{id}': not a UUID"))
        }
        MemoryError::EmptyContent => {
            error_response("validation_error", "Field 'content' cannot be empty")
        }
        MemoryError::Embedding(e) => error_response("embedding_failure", e.to_string()),
        MemoryError::Store(e) => {
            error!(error = %e, "memory store failure");
            error_response("internal_error", "Internal server error")
        }
    }
}

// ============================================================================
// TOOLS
// ============================================================================

pub async fn store_memory(services: &Services, args: &Value) -> Value {
    let content = match require_str(args, "content") {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = check_len("content", &content, MAX_CONTENT_LEN) {
        return e;
    }

    let category = match require_str(args, "category") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(category) = MemoryCategory::parse(&category) else {
        return error_response(
            "validation_error",
            format!(
                "Invalid category '{category}'. Valid: {}",
                MemoryCategory::names().join(", ")
            ),
        );
    };

    let importance = args
        .get("importance")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5);
    if !(0.0..=1.0).contains(&importance) {
        return error_response(
            "validation_error",
            format!("Field 'importance' must be in [0, 1] (got {importance})"),
        );
    }

    let tags: Vec<String> = args
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    match services
        .memory_bank
        .store(&content, category, importance, tags)
        .await
    {
        Ok(record) => json!({
            "id": record.id,
            "category": record.category.as_str(),
            "importance": record.importance,
            "created_at": record.created_at.to_rfc3339(),
        }),
        Err(e) => map_memory_error(e),
    }
}

pub async fn retrieve_memories(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let category = match parse_category(args) {
        Ok(category) => category,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 10) {
        Ok(limit) => limit,
        Err(e) => return e,
    };
    let mode = match opt_str(args, "search_mode") {
        Some(raw) => match SearchMode::parse(&raw) {
            Ok(mode) => mode,
            Err(e) => return error_response("validation_error", e.to_string()),
        },
        None => SearchMode::Semantic,
    };

    match services
        .searcher
        .search_memories(&query, category, limit, mode)
        .await
    {
        Ok(results) => {
            let rows: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "content": preview(&r.content, CONTENT_PREVIEW),
                        "category": r.category,
                        "importance": r.importance,
                        "score": r.score,
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(SearchError::CollectionNotFound(_)) => json!({"results": [], "count": 0}),
        Err(e) => map_search_error(e),
    }
}

pub async fn list_memories(services: &Services, args: &Value) -> Value {
    if let Err(e) = super::reject_search_mode(args, "list_memories") {
        return e;
    }
    let category = match parse_category(args) {
        Ok(category) => category,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 20) {
        Ok(limit) => limit,
        Err(e) => return e,
    };

    match services.memory_bank.list(category, limit).await {
        Ok(records) => {
            let rows: Vec<Value> = records
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "content": preview(&r.content, CONTENT_PREVIEW),
                        "category": r.category.as_str(),
                        "importance": r.importance,
                        "tags": r.tags,
                        "created_at": r.created_at.to_rfc3339(),
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(e) => map_memory_error(e),
    }
}

pub async fn delete_memory(services: &Services, args: &Value) -> Value {
    let id = match require_str(args, "id") {
        Ok(s) => s,
        Err(e) => return e,
    };
    match services.memory_bank.delete(&id).await {
        Ok(()) => json!({"deleted": true, "id": id}),
        Err(e) => map_memory_error(e),
    }
}

pub(super) fn map_search_error(e: SearchError) -> Value {
    match e {
        SearchError::InvalidMode(_) | SearchError::InvalidAxis(_) => {
            error_response("validation_error", e.to_string())
        }
        SearchError::CollectionNotFound(name) => error_response(
            "collection_not_found",
            format!("collection '{name}' not found"),
        ),
        SearchError::Embedding(e) => error_response("embedding_failure", e.to_string()),
        SearchError::Store(e) => {
            error!(error = %e, "search store failure");
            error_response("internal_error", "Internal server error")
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
