//! Learning tools
//!
//! Clustering over experience axes and value formation: inspect
//! clusters, validate candidate value statements against a cluster's
//! centroid, and store the ones that pass.

use serde_json::{json, Value};
use tracing::error;

use engram_core::clustering::ClusterError;
use engram_core::collections::experience_collection;
use engram_core::store::VectorStore as _;
use engram_core::values::{parse_cluster_id, ValueError};
use engram_core::Axis;

use crate::protocol::types::ToolDescription;
use crate::server::Services;

use super::{check_len, error_response, opt_str, parse_limit, require_str};

/// Value statements stay short
const MAX_VALUE_LEN: usize = 500;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "get_clusters".to_string(),
            description: "Cluster one experience axis and report cluster sizes".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "axis": {"type": "string", "enum": Axis::names()}
                },
                "required": ["axis"]
            }),
        },
        ToolDescription {
            name: "get_cluster_members".to_string(),
            description: "List the experiences in one cluster".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cluster_id": {"type": "string", "description": "Cluster id (e.g. 'full_0')"},
                    "limit": {"type": "integer", "default": 50, "minimum": 1, "maximum": 100}
                },
                "required": ["cluster_id"]
            }),
        },
        ToolDescription {
            name: "validate_value".to_string(),
            description: "Validate a proposed value statement against a cluster centroid"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Proposed value statement (max 500 chars)"},
                    "cluster_id": {"type": "string"}
                },
                "required": ["text", "cluster_id"]
            }),
        },
        ToolDescription {
            name: "store_value".to_string(),
            description: "Validate and store a value statement".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "cluster_id": {"type": "string"},
                    "axis": {"type": "string", "enum": Axis::names()}
                },
                "required": ["text", "cluster_id", "axis"]
            }),
        },
        ToolDescription {
            name: "list_values".to_string(),
            description: "List stored values, newest first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "axis": {"type": "string", "enum": Axis::names()},
                    "limit": {"type": "integer", "default": 20, "minimum": 1, "maximum": 100}
                }
            }),
        },
    ]
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn map_value_error(e: ValueError) -> Value {
    match e {
        ValueError::Validation(message) => error_response("validation_error", message),
        ValueError::ClusterNotFound(id) => {
            error_response("not_found", format!("cluster {id} not found"))
        }
        ValueError::Rejected(reason) => error_response("validation_error", reason),
        ValueError::Cluster(ClusterError::InsufficientData { found, required }) => error_response(
            "insufficient_data",
            format!("Not enough experiences for clustering. Found {found}, need at least {required}."),
        ),
        ValueError::Embedding(e) => error_response("embedding_failure", e.to_string()),
        ValueError::Cluster(ClusterError::Store(e)) | ValueError::Store(e) => {
            error!(error = %e, "value store failure");
            error_response("internal_error", "Internal server error")
        }
    }
}

fn parse_axis_arg(args: &Value, key: &str) -> Result<Option<Axis>, Value> {
    match opt_str(args, key) {
        Some(raw) => Axis::parse(&raw).map(Some).ok_or_else(|| {
            error_response(
                "validation_error",
                format!("Invalid axis '{raw}'. Valid axes: {}", Axis::names().join(", ")),
            )
        }),
        None => Ok(None),
    }
}

// ============================================================================
// TOOLS
// ============================================================================

pub async fn get_clusters(services: &Services, args: &Value) -> Value {
    let axis = match parse_axis_arg(args, "axis") {
        Ok(Some(axis)) => axis,
        Ok(None) => return error_response("validation_error", "Field 'axis' is required"),
        Err(e) => return e,
    };

    match services.clusterer.cluster_axis(axis).await {
        Ok(clusters) => {
            let mut noise_count = 0;
            let mut rows: Vec<Value> = Vec::new();
            for cluster in &clusters {
                if cluster.is_noise() {
                    noise_count = cluster.size;
                    continue;
                }
                rows.push(json!({
                    "cluster_id": cluster.cluster_id,
                    "label": cluster.label,
                    "size": cluster.size,
                    "avg_weight": cluster.avg_weight,
                }));
            }
            // Largest clusters first
            rows.sort_by_key(|r| std::cmp::Reverse(r["size"].as_u64().unwrap_or(0)));
            json!({
                "axis": axis.as_str(),
                "clusters": rows,
                "count": rows.len(),
                "noise_count": noise_count,
            })
        }
        Err(ClusterError::InsufficientData { found, required }) => error_response(
            "insufficient_data",
            format!("Not enough experiences for clustering. Found {found}, need at least {required}."),
        ),
        Err(ClusterError::Store(e)) => {
            error!(error = %e, "clustering failed");
            error_response("internal_error", "Internal server error")
        }
    }
}

pub async fn get_cluster_members(services: &Services, args: &Value) -> Value {
    let cluster_id = match require_str(args, "cluster_id") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 50) {
        Ok(l) => l,
        Err(e) => return e,
    };
    let axis = match parse_cluster_id(&cluster_id) {
        Ok((axis, _)) => axis,
        Err(e) => return map_value_error(e),
    };

    let members = match services.value_store.find_cluster(&cluster_id).await {
        Ok(cluster) => cluster.member_ids,
        Err(e) => return map_value_error(e),
    };

    let collection = experience_collection(axis);
    let mut rows = Vec::new();
    for id in members.iter().take(limit) {
        match services.store.get(&collection, id, false).await {
            Ok(Some(record)) => {
                let p = &record.payload;
                rows.push(json!({
                    "id": record.id,
                    "domain": p.get("domain"),
                    "strategy": p.get("strategy"),
                    "outcome_status": p.get("outcome_status"),
                    "confidence_tier": p.get("confidence_tier"),
                }));
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "cluster member fetch failed");
                return error_response("internal_error", "Internal server error");
            }
        }
    }

    json!({
        "cluster_id": cluster_id,
        "axis": axis.as_str(),
        "members": rows,
        "count": rows.len(),
    })
}

pub async fn validate_value(services: &Services, args: &Value) -> Value {
    let text = match require_str(args, "text") {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = check_len("text", &text, MAX_VALUE_LEN) {
        return e;
    }
    let cluster_id = match require_str(args, "cluster_id") {
        Ok(s) => s,
        Err(e) => return e,
    };

    match services
        .value_store
        .validate_candidate(&text, &cluster_id)
        .await
    {
        Ok(outcome) => json!({
            "valid": outcome.valid,
            "similarity": outcome.metrics.similarity,
            "distance": outcome.metrics.distance,
            "threshold": outcome.metrics.threshold,
            "cluster_id": cluster_id,
            "reason": outcome.reason,
        }),
        Err(e) => map_value_error(e),
    }
}

pub async fn store_value(services: &Services, args: &Value) -> Value {
    let text = match require_str(args, "text") {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = check_len("text", &text, MAX_VALUE_LEN) {
        return e;
    }
    let cluster_id = match require_str(args, "cluster_id") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let axis = match parse_axis_arg(args, "axis") {
        Ok(Some(axis)) => axis,
        Ok(None) => return error_response("validation_error", "Field 'axis' is required"),
        Err(e) => return e,
    };

    match services.value_store.store_value(&text, &cluster_id, axis).await {
        Ok(record) => json!({
            "id": record.id,
            "text": record.text,
            "cluster_id": record.cluster_id,
            "axis": record.axis.as_str(),
            "created_at": record.created_at.to_rfc3339(),
        }),
        Err(e) => map_value_error(e),
    }
}

pub async fn list_values(services: &Services, args: &Value) -> Value {
    if let Err(e) = super::reject_search_mode(args, "list_values") {
        return e;
    }
    let axis = match parse_axis_arg(args, "axis") {
        Ok(axis) => axis,
        Err(e) => return e,
    };
    let limit = match parse_limit(args, 20) {
        Ok(l) => l,
        Err(e) => return e,
    };

    match services.value_store.list_values(axis, limit).await {
        Ok(values) => {
            let rows: Vec<Value> = values
                .iter()
                .map(|v| {
                    json!({
                        "id": v.id,
                        "text": v.text,
                        "cluster_id": v.cluster_id,
                        "axis": v.axis.as_str(),
                        "created_at": v.created_at.to_rfc3339(),
                        "distance_to_centroid": v.metrics.distance,
                    })
                })
                .collect();
            json!({"results": rows, "count": rows.len()})
        }
        Err(e) => map_value_error(e),
    }
}

// ============================================================================
// TESTS
// ============================================================================
