//! End-to-end test harness
//!
//! A deterministic mock embedder and fixture builders shared by the
//! scenario tests. The mock maps directional text prefixes ("east",
//! "north") to fixed directions so cluster geometry is controllable,
//! and hashes everything else so distinct texts get distinct but
//! stable vectors.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use engram_core::embeddings::{normalize, EmbeddingError, EmbeddingService};
use engram_core::observation::{
    ConfidenceTier, Domain, GhapEntry, Lesson, Outcome, OutcomeStatus, RootCause,
    RootCauseCategory, Strategy,
};

/// Deterministic embedder for tests
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension >= 2);
        Self { dimension }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0_f32; self.dimension];
        if text.starts_with("east") {
            vector[0] = 1.0;
            vector[1] = 0.05;
        } else if text.starts_with("north") {
            vector[0] = 0.05;
            vector[1] = 1.0;
        } else {
            for (i, b) in text.bytes().enumerate() {
                vector[i % self.dimension] += (b as f32) * ((i % 7) as f32 + 1.0);
            }
            if vector.iter().all(|&x| x == 0.0) {
                vector[0] = 1.0;
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// A resolved falsified entry with surprise and root cause - the
/// four-projection shape.
pub fn falsified_entry(id: &str) -> GhapEntry {
    GhapEntry {
        id: id.to_string(),
        session_id: "session_20260101_080000_fixture".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
        domain: Domain::Debugging,
        strategy: Strategy::CheckAssumptions,
        goal: "fix login failures".to_string(),
        hypothesis: "sessions expire too early".to_string(),
        action: "inspect session TTL configuration".to_string(),
        prediction: "TTL will be below five minutes".to_string(),
        iteration_count: 1,
        history: vec![],
        notes: vec![],
        outcome: Some(Outcome {
            status: OutcomeStatus::Falsified,
            result: "TTL was fine; the auth proxy rejected the cookie".to_string(),
            captured_at: Utc.with_ymd_and_hms(2026, 1, 1, 8, 30, 0).unwrap(),
            auto_captured: false,
        }),
        surprise: Some("unexpected auth".to_string()),
        root_cause: Some(RootCause {
            category: RootCauseCategory::WrongAssumption,
            description: "assumed expiry, but the proxy never forwarded the cookie".to_string(),
        }),
        lesson: Some(Lesson {
            what_worked: "reading the proxy access log".to_string(),
            takeaway: None,
        }),
        confidence_tier: Some(ConfidenceTier::Silver),
    }
}

/// A resolved confirmed entry - the two-projection shape.
pub fn confirmed_entry(id: &str) -> GhapEntry {
    GhapEntry {
        id: id.to_string(),
        session_id: "session_20260101_080000_fixture".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap(),
        domain: Domain::Performance,
        strategy: Strategy::DivideAndConquer,
        goal: "halve p99 latency".to_string(),
        hypothesis: "the N+1 query dominates".to_string(),
        action: "batch the lookups".to_string(),
        prediction: "p99 drops below 200ms".to_string(),
        iteration_count: 2,
        history: vec![],
        notes: vec![],
        outcome: Some(Outcome {
            status: OutcomeStatus::Confirmed,
            result: "p99 went from 420ms to 160ms".to_string(),
            captured_at: Utc.with_ymd_and_hms(2026, 1, 2, 11, 0, 0).unwrap(),
            auto_captured: true,
        }),
        surprise: None,
        root_cause: None,
        lesson: Some(Lesson {
            what_worked: "profiling before changing anything".to_string(),
            takeaway: Some("measure first".to_string()),
        }),
        confidence_tier: Some(ConfidenceTier::Gold),
    }
}
