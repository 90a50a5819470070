//! Payload filter grammar
//!
//! A filter maps a payload field to a matcher: either a literal
//! (equality) or an operator map drawn from `$gte`/`$lte`/`$gt`/`$lt`/
//! `$in`. All matchers on one query combine conjunctively.

use std::collections::BTreeMap;

use serde_json::Value;

use super::Payload;

/// A single field matcher
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Literal equality against the payload value
    Eq(Value),
    /// Greater-than-or-equal
    Gte(Value),
    /// Less-than-or-equal
    Lte(Value),
    /// Strictly greater-than
    Gt(Value),
    /// Strictly less-than
    Lt(Value),
    /// Payload value is one of these
    In(Vec<Value>),
    /// Conjunction of several operator conditions on one field
    All(Vec<FilterValue>),
}

/// A conjunctive filter set: field name to matcher
pub type Filters = BTreeMap<String, FilterValue>;

/// Convenience constructors for common filters
pub mod build {
    use super::*;

    /// Equality on a string field
    pub fn eq(field: &str, value: impl Into<Value>) -> (String, FilterValue) {
        (field.to_string(), FilterValue::Eq(value.into()))
    }

    /// `field >= epoch_seconds`, the shape datetime filters convert to
    pub fn gte_ts(field: &str, epoch_seconds: f64) -> (String, FilterValue) {
        (
            field.to_string(),
            FilterValue::Gte(Value::from(epoch_seconds)),
        )
    }
}

/// Ordering over JSON scalars: numbers compare numerically, strings
/// lexicographically. Cross-type comparisons never match.
fn compare(payload_value: &Value, filter_value: &Value) -> Option<std::cmp::Ordering> {
    match (payload_value, filter_value) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn matches_one(payload_value: &Value, matcher: &FilterValue) -> bool {
    match matcher {
        FilterValue::Eq(expected) => payload_value == expected,
        FilterValue::Gte(bound) => {
            matches!(compare(payload_value, bound), Some(o) if o.is_ge())
        }
        FilterValue::Lte(bound) => {
            matches!(compare(payload_value, bound), Some(o) if o.is_le())
        }
        FilterValue::Gt(bound) => {
            matches!(compare(payload_value, bound), Some(o) if o.is_gt())
        }
        FilterValue::Lt(bound) => {
            matches!(compare(payload_value, bound), Some(o) if o.is_lt())
        }
        FilterValue::In(candidates) => candidates.iter().any(|c| c == payload_value),
        FilterValue::All(conditions) => conditions.iter().all(|c| matches_one(payload_value, c)),
    }
}

/// True iff the payload satisfies every matcher. A field missing from
/// the payload fails its matcher.
pub fn matches_filters(payload: &Payload, filters: &Filters) -> bool {
    filters.iter().all(|(field, matcher)| {
        payload
            .get(field)
            .is_some_and(|value| matches_one(value, matcher))
    })
}
