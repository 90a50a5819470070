//! Typed search results
//!
//! One result type per collection, each mapped from a fixed set of
//! payload keys. These are the single definitions; other modules
//! re-export rather than redefine them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collections::Axis;
use crate::store::{Payload, StoredRecord};

fn get_str(payload: &Payload, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn get_opt_str(payload: &Payload, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn get_f64(payload: &Payload, key: &str) -> f64 {
    payload.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn get_u64(payload: &Payload, key: &str) -> u64 {
    payload.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn get_str_vec(payload: &Payload, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn get_datetime(payload: &Payload, key: &str) -> Option<DateTime<Utc>> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Result from memory search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResult {
    pub id: String,
    pub content: String,
    pub category: String,
    pub importance: f64,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub score: f32,
}

impl MemoryResult {
    pub fn from_record(record: &StoredRecord) -> Self {
        let p = &record.payload;
        Self {
            id: record.id.clone(),
            content: get_str(p, "content"),
            category: get_str(p, "category"),
            importance: get_f64(p, "importance"),
            tags: get_str_vec(p, "tags"),
            created_at: get_datetime(p, "created_at"),
            score: record.score,
        }
    }
}

/// Result from code search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeResult {
    pub id: String,
    pub project: String,
    pub file_path: String,
    pub language: String,
    pub unit_type: String,
    pub qualified_name: String,
    pub code: String,
    pub docstring: Option<String>,
    pub line_start: u64,
    pub line_end: u64,
    pub score: f32,
}

impl CodeResult {
    pub fn from_record(record: &StoredRecord) -> Self {
        let p = &record.payload;
        Self {
            id: record.id.clone(),
            project: get_str(p, "project"),
            file_path: get_str(p, "file_path"),
            language: get_str(p, "language"),
            unit_type: get_str(p, "unit_type"),
            qualified_name: get_str(p, "qualified_name"),
            code: get_str(p, "code"),
            docstring: get_opt_str(p, "docstring"),
            line_start: get_u64(p, "line_start"),
            line_end: get_u64(p, "line_end"),
            score: record.score,
        }
    }
}

/// Result from experience search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceResult {
    pub id: String,
    pub ghap_id: String,
    pub axis: Axis,
    pub domain: String,
    pub strategy: String,
    pub goal: String,
    pub hypothesis: String,
    pub action: String,
    pub prediction: String,
    pub outcome_status: String,
    pub outcome_result: String,
    pub surprise: Option<String>,
    pub root_cause_category: Option<String>,
    pub lesson: Option<String>,
    pub confidence_tier: Option<String>,
    pub iteration_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub score: f32,
}

impl ExperienceResult {
    pub fn from_record(record: &StoredRecord, axis: Axis) -> Self {
        let p = &record.payload;
        Self {
            id: record.id.clone(),
            ghap_id: get_str(p, "ghap_id"),
            axis,
            domain: get_str(p, "domain"),
            strategy: get_str(p, "strategy"),
            goal: get_str(p, "goal"),
            hypothesis: get_str(p, "hypothesis"),
            action: get_str(p, "action"),
            prediction: get_str(p, "prediction"),
            outcome_status: get_str(p, "outcome_status"),
            outcome_result: get_str(p, "outcome_result"),
            surprise: get_opt_str(p, "surprise"),
            root_cause_category: get_opt_str(p, "root_cause_category"),
            lesson: get_opt_str(p, "lesson"),
            confidence_tier: get_opt_str(p, "confidence_tier"),
            iteration_count: get_u64(p, "iteration_count"),
            created_at: get_datetime(p, "created_at"),
            score: record.score,
        }
    }
}

/// Result from value search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueResult {
    pub id: String,
    pub text: String,
    pub cluster_id: String,
    pub axis: String,
    pub cluster_size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub score: f32,
}

impl ValueResult {
    pub fn from_record(record: &StoredRecord) -> Self {
        let p = &record.payload;
        Self {
            id: record.id.clone(),
            text: get_str(p, "text"),
            cluster_id: get_str(p, "cluster_id"),
            axis: get_str(p, "axis"),
            cluster_size: get_u64(p, "cluster_size"),
            created_at: get_datetime(p, "created_at"),
            score: record.score,
        }
    }
}

/// Result from commit search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub id: String,
    pub sha: String,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub files_changed: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
    pub score: f32,
}

impl CommitResult {
    pub fn from_record(record: &StoredRecord) -> Self {
        let p = &record.payload;
        Self {
            id: record.id.clone(),
            sha: get_str(p, "sha"),
            message: get_str(p, "message"),
            author: get_str(p, "author"),
            author_email: get_str(p, "author_email"),
            committed_at: get_datetime(p, "timestamp_iso"),
            files_changed: get_str_vec(p, "files_changed"),
            insertions: get_u64(p, "insertions"),
            deletions: get_u64(p, "deletions"),
            score: record.score,
        }
    }
}
