//! Identifier generation for journal entries, sessions, and values.
//!
//! GHAP and session ids embed a UTC timestamp so that archive file
//! names sort chronologically; the random suffix keeps ids unique
//! when several entries are created within the same second.

use chrono::Utc;
use uuid::Uuid;

/// Take the first `n` hex characters of a fresh UUID v4.
fn random_suffix(n: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..n].to_string()
}

/// Generate a GHAP entry id: `ghap_{yyyymmdd}_{hhmmss}_{rand6}`.
pub fn generate_ghap_id() -> String {
    let now = Utc::now();
    format!("ghap_{}_{}", now.format("%Y%m%d_%H%M%S"), random_suffix(6))
}

/// Generate a session id: `session_{yyyymmdd}_{hhmmss}_{rand6}`.
pub fn generate_session_id() -> String {
    let now = Utc::now();
    format!(
        "session_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        random_suffix(6)
    )
}

/// Generate a value id: `value_{axis}_{label}_{rand8}`.
pub fn generate_value_id(axis: &str, label: i32) -> String {
    format!("value_{}_{}_{}", axis, label, random_suffix(8))
}

/// Generate a memory id (plain UUID v4).
pub fn generate_memory_id() -> String {
    Uuid::new_v4().to_string()
}
