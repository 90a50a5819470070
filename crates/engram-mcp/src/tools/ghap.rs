//! GHAP tracking tools
//!
//! start/update/resolve the active entry, read it back, and list
//! persisted entries. Resolution is sealed locally first, then
//! persisted to the vector store with retries - a persistence failure
//! never loses the journal record.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use engram_core::collections::experience_collection;
use engram_core::observation::{
    Domain, GhapResolution, GhapUpdate, JournalError, Lesson, OutcomeStatus, RootCause,
    RootCauseCategory, Strategy,
};
use engram_core::store::{build, Filters, VectorStore as _};
use engram_core::Axis;

use crate::protocol::types::ToolDescription;
use crate::server::Services;

use super::{check_len, error_response, opt_str, parse_limit, preview, require_str};

/// Tool-boundary limits, tighter than the journal's own cap
const MAX_FIELD_LEN: usize = 1000;
const MAX_DETAIL_LEN: usize = 2000;

/// Persistence retry schedule on resolve
const PERSIST_RETRIES: u32 = 3;
const PERSIST_BACKOFF_SECS: u64 = 1;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "start_ghap".to_string(),
            description: "Begin tracking a new GHAP entry (goal, hypothesis, action, prediction)"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "domain": {
                        "type": "string",
                        "description": "Task domain",
                        "enum": Domain::names()
                    },
                    "strategy": {
                        "type": "string",
                        "description": "Problem-solving strategy",
                        "enum": Strategy::names()
                    },
                    "goal": {"type": "string", "description": "What meaningful change are you trying to make?"},
                    "hypothesis": {"type": "string", "description": "What do you believe about the situation?"},
                    "action": {"type": "string", "description": "What are you doing based on this belief?"},
                    "prediction": {"type": "string", "description": "If the hypothesis is correct, what will you observe?"}
                },
                "required": ["domain", "strategy", "goal", "hypothesis", "action", "prediction"]
            }),
        },
        ToolDescription {
            name: "update_ghap".to_string(),
            description: "Update the active GHAP entry; changing H/A/P records an iteration"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hypothesis": {"type": "string"},
                    "action": {"type": "string"},
                    "prediction": {"type": "string"},
                    "strategy": {"type": "string", "enum": Strategy::names()},
                    "note": {"type": "string", "description": "Observation to append without changing H/A/P"}
                }
            }),
        },
        ToolDescription {
            name: "resolve_ghap".to_string(),
            description: "Mark the active GHAP entry as resolved and persist it".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": OutcomeStatus::names(),
                        "description": "Resolution status"
                    },
                    "result": {"type": "string", "description": "What actually happened"},
                    "surprise": {"type": "string", "description": "What was unexpected (required for falsified)"},
                    "root_cause": {
                        "type": "object",
                        "description": "Why the hypothesis was wrong (required for falsified)",
                        "properties": {
                            "category": {"type": "string", "enum": RootCauseCategory::names()},
                            "description": {"type": "string"}
                        },
                        "required": ["category", "description"]
                    },
                    "lesson": {
                        "type": "object",
                        "properties": {
                            "what_worked": {"type": "string"},
                            "takeaway": {"type": "string"}
                        },
                        "required": ["what_worked"]
                    }
                },
                "required": ["status", "result"]
            }),
        },
        ToolDescription {
            name: "get_active_ghap".to_string(),
            description: "Get the current active GHAP entry".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "list_ghap_entries".to_string(),
            description: "List persisted GHAP entries with optional filters".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "default": 20, "minimum": 1, "maximum": 100},
                    "domain": {"type": "string", "enum": Domain::names()},
                    "outcome": {"type": "string", "enum": OutcomeStatus::names()},
                    "since": {"type": "string", "description": "ISO 8601 creation-date lower bound"}
                }
            }),
        },
    ]
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn map_journal_error(e: JournalError) -> Value {
    match e {
        JournalError::AlreadyActive(id) => error_response(
            "already_active",
            format!("GHAP entry {id} is already active"),
        ),
        JournalError::NotFound(message) => error_response("not_found", message),
        JournalError::Corrupted(message) => {
            error!(error = %message, "journal corrupted");
            error_response("journal_corrupted", message)
        }
    }
}

// ============================================================================
// TOOLS
// ============================================================================

pub async fn start_ghap(services: &Services, args: &Value) -> Value {
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

    let strategy = match require_str(args, "strategy") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(strategy) = Strategy::parse(&strategy) else {
        return error_response(
            "validation_error",
            format!(
                "Invalid strategy '{strategy}'. Valid: {}",
                Strategy::names().join(", ")
            ),
        );
    };

    let mut fields = [String::new(), String::new(), String::new(), String::new()];
    for (slot, name) in fields
        .iter_mut()
        .zip(["goal", "hypothesis", "action", "prediction"])
    {
        *slot = match require_str(args, name) {
            Ok(s) => s,
            Err(e) => return e,
        };
        if let Err(e) = check_len(name, slot, MAX_FIELD_LEN) {
            return e;
        }
    }
    let [goal, hypothesis, action, prediction] = fields;

    match services
        .collector
        .create(domain, strategy, &goal, &hypothesis, &action, &prediction)
        .await
    {
        Ok(entry) => {
            info!(ghap_id = %entry.id, "ghap started");
            json!({
                "id": entry.id,
                "session_id": entry.session_id,
                "domain": entry.domain.as_str(),
                "strategy": entry.strategy.as_str(),
                "created_at": entry.created_at.to_rfc3339(),
            })
        }
        Err(e) => map_journal_error(e),
    }
}

pub async fn update_ghap(services: &Services, args: &Value) -> Value {
    let strategy = match opt_str(args, "strategy") {
        Some(s) => match Strategy::parse(&s) {
            Some(strategy) => Some(strategy),
            None => {
                return error_response(
                    "validation_error",
                    format!("Invalid strategy '{s}'. Valid: {}", Strategy::names().join(", ")),
                )
            }
        },
        None => None,
    };

    for field in ["hypothesis", "action", "prediction", "note"] {
        if let Some(value) = opt_str(args, field) {
            if let Err(e) = check_len(field, &value, MAX_FIELD_LEN) {
                return e;
            }
        }
    }

    let update = GhapUpdate {
        hypothesis: opt_str(args, "hypothesis"),
        action: opt_str(args, "action"),
        prediction: opt_str(args, "prediction"),
        strategy,
        note: opt_str(args, "note"),
    };

    if update.hypothesis.is_none()
        && update.action.is_none()
        && update.prediction.is_none()
        && update.strategy.is_none()
        && update.note.is_none()
    {
        return error_response(
            "validation_error",
            "At least one of hypothesis, action, prediction, strategy, note is required",
        );
    }

    match services.collector.update(update).await {
        Ok(entry) => json!({
            "id": entry.id,
            "iteration_count": entry.iteration_count,
            "strategy": entry.strategy.as_str(),
            "updated": true,
        }),
        Err(e) => map_journal_error(e),
    }
}

fn parse_root_cause(args: &Value) -> Result<Option<RootCause>, Value> {
    let Some(raw) = args.get("root_cause").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(obj) = raw.as_object() else {
        return Err(error_response(
            "validation_error",
            "Field 'root_cause' must be an object with 'category' and 'description'",
        ));
    };

    let category = obj
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let Some(category) = RootCauseCategory::parse(category) else {
        return Err(error_response(
            "validation_error",
            format!(
                "Invalid root_cause.category. Valid: {}",
                RootCauseCategory::names().join(", ")
            ),
        ));
    };

    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if description.is_empty() {
        return Err(error_response(
            "validation_error",
            "Field 'root_cause.description' is required",
        ));
    }
    check_len("root_cause.description", description, MAX_DETAIL_LEN)?;

    Ok(Some(RootCause {
        category,
        description: description.to_string(),
    }))
}

fn parse_lesson(args: &Value) -> Result<Option<Lesson>, Value> {
    let Some(raw) = args.get("lesson").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(obj) = raw.as_object() else {
        return Err(error_response(
            "validation_error",
            "Field 'lesson' must be an object with 'what_worked' and optional 'takeaway'",
        ));
    };

    let what_worked = obj
        .get("what_worked")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if what_worked.is_empty() {
        return Err(error_response(
            "validation_error",
            "Field 'lesson.what_worked' is required when lesson is provided",
        ));
    }
    check_len("lesson.what_worked", what_worked, MAX_DETAIL_LEN)?;

    let takeaway = obj.get("takeaway").and_then(|v| v.as_str());
    if let Some(takeaway) = takeaway {
        check_len("lesson.takeaway", takeaway, MAX_DETAIL_LEN)?;
    }

    Ok(Some(Lesson {
        what_worked: what_worked.to_string(),
        takeaway: takeaway.map(str::to_string),
    }))
}

pub async fn resolve_ghap(services: &Services, args: &Value) -> Value {
    let status = match require_str(args, "status") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(status) = OutcomeStatus::parse(&status) else {
        return error_response(
            "validation_error",
            format!(
                "Invalid status '{status}'. Valid: {}",
                OutcomeStatus::names().join(", ")
            ),
        );
    };

    let result = match require_str(args, "result") {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = check_len("result", &result, MAX_DETAIL_LEN) {
        return e;
    }

    let surprise = opt_str(args, "surprise");
    if let Some(surprise) = &surprise {
        if let Err(e) = check_len("surprise", surprise, MAX_DETAIL_LEN) {
            return e;
        }
    }

    let root_cause = match parse_root_cause(args) {
        Ok(root_cause) => root_cause,
        Err(e) => return e,
    };
    let lesson = match parse_lesson(args) {
        Ok(lesson) => lesson,
        Err(e) => return e,
    };

    if status == OutcomeStatus::Falsified {
        if surprise.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return error_response(
                "validation_error",
                "Field 'surprise' is required when status is 'falsified'",
            );
        }
        if root_cause.is_none() {
            return error_response(
                "validation_error",
                "Field 'root_cause' is required when status is 'falsified'",
            );
        }
    }

    // Seal locally first; the journal record survives any
    // persistence failure below.
    let resolved = match services
        .collector
        .resolve(GhapResolution {
            status,
            result,
            surprise,
            root_cause,
            lesson,
            auto_captured: false,
        })
        .await
    {
        Ok(entry) => entry,
        Err(e) => return map_journal_error(e),
    };

    let mut backoff = PERSIST_BACKOFF_SECS;
    for attempt in 1..=PERSIST_RETRIES {
        match services.persister.persist(&resolved).await {
            Ok(_) => {
                info!(ghap_id = %resolved.id, attempt, "ghap persisted");
                break;
            }
            Err(e) if attempt < PERSIST_RETRIES => {
                warn!(
                    ghap_id = %resolved.id,
                    attempt,
                    backoff_seconds = backoff,
                    error = %e,
                    "ghap persist retry"
                );
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(ghap_id = %resolved.id, attempts = PERSIST_RETRIES, error = %e, "ghap persist failed");
                return error_response(
                    "embedding_failure",
                    format!(
                        "Failed to persist GHAP entry after {PERSIST_RETRIES} attempts. \
                         Local resolution saved, but embedding/storage failed."
                    ),
                );
            }
        }
    }

    json!({
        "id": resolved.id,
        "status": status.as_str(),
        "confidence_tier": resolved.confidence_tier.map(|t| t.as_str()),
        "resolved_at": resolved
            .outcome
            .as_ref()
            .map(|o| o.captured_at.to_rfc3339()),
    })
}

pub async fn get_active_ghap(services: &Services) -> Value {
    match services.collector.get_current().await {
        Ok(Some(entry)) => json!({
            "active": true,
            "id": entry.id,
            "session_id": entry.session_id,
            "domain": entry.domain.as_str(),
            "strategy": entry.strategy.as_str(),
            "goal": preview(&entry.goal, 300),
            "hypothesis": preview(&entry.hypothesis, 300),
            "action": preview(&entry.action, 300),
            "prediction": preview(&entry.prediction, 300),
            "iteration_count": entry.iteration_count,
            "note_count": entry.notes.len(),
            "created_at": entry.created_at.to_rfc3339(),
        }),
        Ok(None) => json!({"active": false}),
        Err(e) => map_journal_error(e),
    }
}

pub async fn list_ghap_entries(services: &Services, args: &Value) -> Value {
    if let Err(e) = super::reject_search_mode(args, "list_ghap_entries") {
        return e;
    }
    let limit = match parse_limit(args, 20) {
        Ok(limit) => limit,
        Err(e) => return e,
    };

    let mut filters = Filters::new();
    if let Some(domain) = opt_str(args, "domain") {
        let Some(domain) = Domain::parse(&domain) else {
            return error_response(
                "validation_error",
                format!("Invalid domain '{domain}'. Valid: {}", Domain::names().join(", ")),
            );
        };
        filters.extend([build::eq("domain", domain.as_str())]);
    }
    if let Some(outcome) = opt_str(args, "outcome") {
        let Some(outcome) = OutcomeStatus::parse(&outcome) else {
            return error_response(
                "validation_error",
                format!(
                    "Invalid outcome '{outcome}'. Valid: {}",
                    OutcomeStatus::names().join(", ")
                ),
            );
        };
        filters.extend([build::eq("outcome_status", outcome.as_str())]);
    }
    if let Some(since) = opt_str(args, "since") {
        let Ok(since) = DateTime::parse_from_rfc3339(&since) else {
            return error_response(
                "validation_error",
                format!(
                    "Invalid date format for 'since': {since}. \
                     Expected ISO 8601 (e.g. '2026-01-15T10:30:45+00:00')"
                ),
            );
        };
        let since = since.with_timezone(&Utc);
        filters.extend([build::gte_ts("created_at_ts", since.timestamp() as f64)]);
    }
    let filters = (!filters.is_empty()).then_some(filters);

    let records = match services
        .store
        .scroll(
            &experience_collection(Axis::Full),
            limit,
            filters.as_ref(),
            false,
        )
        .await
    {
        Ok(records) => records,
        Err(engram_core::StoreError::CollectionNotFound(_)) => vec![],
        Err(e) => {
            error!(error = %e, "list_ghap_entries failed");
            return error_response("internal_error", "Internal server error");
        }
    };

    let results: Vec<Value> = records
        .iter()
        .map(|r| {
            let p = &r.payload;
            json!({
                "id": r.id,
                "domain": p.get("domain"),
                "strategy": p.get("strategy"),
                "goal": p.get("goal").and_then(|v| v.as_str()).map(|s| preview(s, 120)),
                "outcome_status": p.get("outcome_status"),
                "confidence_tier": p.get("confidence_tier"),
                "created_at": p.get("created_at"),
            })
        })
        .collect();

    json!({"results": results, "count": results.len()})
}

// ============================================================================
// TESTS
// ============================================================================
