//! Context assembly tools

use serde_json::{json, Value};

use engram_core::context::{ContextError, SourceKind};
use engram_core::observation::{Domain, Strategy};

use crate::protocol::types::ToolDescription;
use crate::server::Services;

use super::{error_response, opt_str, require_str};

const DEFAULT_CONTEXT_LIMIT: usize = 20;
const DEFAULT_CONTEXT_TOKENS: usize = 2000;
const DEFAULT_PREMORTEM_LIMIT: usize = 10;
const DEFAULT_PREMORTEM_TOKENS: usize = 1500;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "assemble_context".to_string(),
            description: "Assemble a budgeted, deduplicated context pack from multiple sources"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "context_types": {
                        "type": "array",
                        "items": {"type": "string", "enum": SourceKind::names()},
                        "description": "Sources to include"
                    },
                    "limit": {"type": "integer", "default": 20, "minimum": 1, "maximum": 100},
                    "max_tokens": {"type": "integer", "default": 2000, "minimum": 1, "maximum": 100000}
                },
                "required": ["query", "context_types"]
            }),
        },
        ToolDescription {
            name: "get_premortem_context".to_string(),
            description:
                "Assemble past failures, surprises, and root causes for a domain before starting"
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "domain": {"type": "string", "enum": Domain::names()},
                    "strategy": {"type": "string", "enum": Strategy::names()},
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "max_tokens": {"type": "integer", "default": 1500, "minimum": 1, "maximum": 100000}
                },
                "required": ["domain"]
            }),
        },
    ]
}

// ============================================================================
// TOOLS
// ============================================================================

pub async fn assemble_context(services: &Services, args: &Value) -> Value {
    let query = match require_str(args, "query") {
        Ok(s) => s,
        Err(e) => return e,
    };

    let Some(raw_types) = args.get("context_types").and_then(|v| v.as_array()) else {
        return error_response("validation_error", "Field 'context_types' is required");
    };
    if raw_types.is_empty() {
        return error_response("validation_error", "Field 'context_types' cannot be empty");
    }
    let mut context_types = Vec::with_capacity(raw_types.len());
    for raw in raw_types {
        let name = raw.as_str().unwrap_or_default();
        let Some(kind) = SourceKind::parse(name) else {
            return error_response(
                "validation_error",
                format!(
                    "Invalid context type '{name}'. Valid: {}",
                    SourceKind::names().join(", ")
                ),
            );
        };
        if !context_types.contains(&kind) {
            context_types.push(kind);
        }
    }

    let limit = args
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_CONTEXT_LIMIT as u64) as usize;
    let max_tokens = args
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_CONTEXT_TOKENS as u64) as usize;

    match services
        .assembler
        .assemble_context(&query, &context_types, limit, max_tokens)
        .await
    {
        Ok(context) => {
            let sources_used: serde_json::Map<String, Value> = context
                .sources_used
                .iter()
                .map(|(source, count)| (source.as_str().to_string(), json!(count)))
                .collect();
            json!({
                "markdown": context.markdown,
                "token_count": context.token_count,
                "sources_used": sources_used,
                "budget_exceeded": context.budget_exceeded,
                "truncated_items": context.truncated_items,
                "item_count": context.items.len(),
            })
        }
        Err(ContextError::InvalidContextType(t)) => error_response(
            "validation_error",
            format!("Invalid context type '{t}'"),
        ),
        Err(ContextError::InvalidBudget(message)) => error_response("validation_error", message),
    }
}

pub async fn get_premortem_context(services: &Services, args: &Value) -> Value {
    let domain = match require_str(args, "domain") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(domain) = Domain::parse(&domain) else {
        return error_response(
            "validation_error",
            format!("Invalid domain '{domain}'. Valid: {}", Domain::names().join(", ")),
        );
    };

    let strategy = match opt_str(args, "strategy") {
        Some(raw) => match Strategy::parse(&raw) {
            Some(strategy) => Some(strategy),
            None => {
                return error_response(
                    "validation_error",
                    format!(
                        "Invalid strategy '{raw}'. Valid: {}",
                        Strategy::names().join(", ")
                    ),
                )
            }
        },
        None => None,
    };

    let limit = args
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_PREMORTEM_LIMIT as u64) as usize;
    let max_tokens = args
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_PREMORTEM_TOKENS as u64) as usize;

    let context = services
        .assembler
        .get_premortem_context(domain, strategy, limit, max_tokens)
        .await;

    let sources_used: serde_json::Map<String, Value> = context
        .sources_used
        .iter()
        .map(|(source, count)| (source.as_str().to_string(), json!(count)))
        .collect();
    json!({
        "markdown": context.markdown,
        "token_count": context.token_count,
        "sources_used": sources_used,
        "budget_exceeded": context.budget_exceeded,
    })
}

// ============================================================================
// TESTS
// ============================================================================
