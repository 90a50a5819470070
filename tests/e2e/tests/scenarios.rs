//! End-to-end scenarios across the full stack: journal, persister,
//! searcher, clusterer, value store, and context assembler over the
//! in-memory vector store.

use std::sync::Arc;

use engram_core::clustering::ExperienceClusterer;
use engram_core::context::{ContextAssembler, SourceKind};
use engram_core::embeddings::normalize;
use engram_core::memories::{MemoryBank, MemoryCategory};
use engram_core::observation::{
    ConfidenceTier, Domain, GhapResolution, GhapUpdate, ObservationCollector,
    ObservationPersister, OutcomeStatus, RootCause, RootCauseCategory, Strategy,
};
use engram_core::search::{SearchMode, Searcher, SearcherOps};
use engram_core::store::{Payload, VectorStore};
use engram_core::values::ValueStore;
use engram_core::{Axis, EmbeddingService, InMemoryStore};

use engram_e2e_tests::MockEmbedder;
use tempfile::TempDir;

struct Stack {
    collector: ObservationCollector,
    persister: ObservationPersister,
    searcher: Arc<Searcher>,
    assembler: ContextAssembler,
    clusterer: Arc<ExperienceClusterer>,
    value_store: ValueStore,
    memory_bank: MemoryBank,
    store: Arc<InMemoryStore>,
    _dir: TempDir,
}

fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let embedder: Arc<dyn EmbeddingService> = Arc::new(MockEmbedder::new(8));

    let collector = ObservationCollector::new(dir.path().join("journal")).unwrap();
    let persister = ObservationPersister::new(embedder.clone(), store.clone());
    let searcher = Arc::new(Searcher::new(embedder.clone(), store.clone()));
    let assembler = ContextAssembler::new(searcher.clone() as Arc<dyn SearcherOps>);
    let clusterer = Arc::new(ExperienceClusterer::new(store.clone()));
    let value_store = ValueStore::new(embedder.clone(), store.clone(), clusterer.clone());
    let memory_bank = MemoryBank::new(embedder, store.clone());

    Stack {
        collector,
        persister,
        searcher,
        assembler,
        clusterer,
        value_store,
        memory_bank,
        store,
        _dir: dir,
    }
}

// ============================================================================
// S1 - happy path through the journal
// ============================================================================

#[tokio::test]
async fn s1_create_update_resolve() {
    let stack = stack();

    let entry = stack
        .collector
        .create(
            Domain::Debugging,
            Strategy::SystematicElimination,
            "fix X",
            "H1",
            "A1",
            "P1",
        )
        .await
        .unwrap();
    assert_eq!(entry.iteration_count, 1);
    assert!(entry.history.is_empty());

    let updated = stack
        .collector
        .update(GhapUpdate {
            hypothesis: Some("H2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.iteration_count, 2);
    assert_eq!(updated.history.len(), 1);
    assert_eq!(updated.history[0].hypothesis, "H1");
    assert_eq!(updated.history[0].action, "A1");
    assert_eq!(updated.history[0].prediction, "P1");

    let resolved = stack
        .collector
        .resolve(GhapResolution {
            status: OutcomeStatus::Confirmed,
            result: "ok".to_string(),
            surprise: None,
            root_cause: None,
            lesson: None,
            auto_captured: false,
        })
        .await
        .unwrap();

    assert!(resolved.outcome.is_some());
    assert!(matches!(
        resolved.confidence_tier,
        Some(ConfidenceTier::Gold) | Some(ConfidenceTier::Silver)
    ));

    // current_ghap.json is gone, session_entries has exactly one line
    assert!(stack.collector.get_current().await.unwrap().is_none());
    let journal = stack.collector.journal_dir();
    assert!(!journal.join("current_ghap.json").exists());
    let lines = std::fs::read_to_string(journal.join("session_entries.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 1);
}

// ============================================================================
// S2 - falsified entry lands in all four projections
// ============================================================================

#[tokio::test]
async fn s2_falsified_four_projections() {
    let stack = stack();

    stack
        .collector
        .create(
            Domain::Debugging,
            Strategy::CheckAssumptions,
            "fix login",
            "sessions expire early",
            "check TTL",
            "TTL below 5m",
        )
        .await
        .unwrap();
    let resolved = stack
        .collector
        .resolve(GhapResolution {
            status: OutcomeStatus::Falsified,
            result: "TTL fine, auth proxy rejected cookie".to_string(),
            surprise: Some("unexpected auth".to_string()),
            root_cause: Some(RootCause {
                category: RootCauseCategory::WrongAssumption,
                description: "assumed expiry".to_string(),
            }),
            lesson: None,
            auto_captured: false,
        })
        .await
        .unwrap();

    let axes = stack.persister.persist(&resolved).await.unwrap();
    assert_eq!(axes.len(), 4);

    for collection in ["ghap_full", "ghap_strategy", "ghap_surprise", "ghap_root_cause"] {
        let record = stack
            .store
            .get(collection, &resolved.id, false)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("missing row in {collection}"));
        assert_eq!(record.payload["ghap_id"], resolved.id.as_str());
    }

    for collection in ["ghap_surprise", "ghap_root_cause"] {
        let record = stack
            .store
            .get(collection, &resolved.id, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.payload["root_cause_category"], "wrong-assumption");
    }
}

// ============================================================================
// S3 - dedup and budget through the assembler
// ============================================================================

#[tokio::test]
async fn s3_dedup_and_budget() {
    let stack = stack();

    // Two near-identical memories (fuzzy duplicates) plus one distinct,
    // and one code unit
    stack
        .memory_bank
        .store(
            "east wind pattern: cache invalidation cascades through the fleet",
            MemoryCategory::Fact,
            0.9,
            vec![],
        )
        .await
        .unwrap();
    stack
        .memory_bank
        .store(
            "east wind pattern: cache invalidation cascades through the fleets",
            MemoryCategory::Fact,
            0.4,
            vec![],
        )
        .await
        .unwrap();
    stack
        .memory_bank
        .store(
            "completely unrelated note about the deploy window",
            MemoryCategory::Context,
            0.5,
            vec![],
        )
        .await
        .unwrap();

    stack
        .store
        .create_collection("code", 8, engram_core::Distance::Cosine)
        .await
        .unwrap();
    let code_payload: Payload = serde_json::json!({
        "project": "api",
        "file_path": "src/cache.rs",
        "language": "rust",
        "unit_type": "function",
        "qualified_name": "cache::invalidate",
        "code": "fn invalidate() {}",
        "line_start": 10,
        "line_end": 12,
    })
    .as_object()
    .unwrap()
    .clone();
    let mut v = vec![1.0, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    normalize(&mut v);
    stack
        .store
        .upsert("code", "code-1", v, code_payload)
        .await
        .unwrap();

    let context = stack
        .assembler
        .assemble_context(
            "east cache invalidation",
            &[SourceKind::Memories, SourceKind::Code],
            5,
            1000,
        )
        .await
        .unwrap();

    // Exactly one of the fuzzy duplicates survived, the higher-relevance one
    let cascade_items: Vec<_> = context
        .items
        .iter()
        .filter(|i| i.content.contains("cache invalidation cascades"))
        .collect();
    assert_eq!(cascade_items.len(), 1);

    assert!(context.token_count <= 1000 || context.budget_exceeded);
    let total: usize = context.sources_used.values().sum();
    assert_eq!(total, context.items.len());
    assert_eq!(context.sources_used[&SourceKind::Memories], 2);
    assert_eq!(context.sources_used[&SourceKind::Code], 1);
}

// ============================================================================
// S4 - value validation against the cluster spread
// ============================================================================

async fn seed_axis(store: &InMemoryStore) {
    store
        .create_collection("ghap_full", 8, engram_core::Distance::Cosine)
        .await
        .unwrap();
    let tier = |t: &str| -> Payload {
        serde_json::json!({"confidence_tier": t}).as_object().unwrap().clone()
    };
    for i in 0..12 {
        let mut v = vec![1.0, 0.01 * (i as f32 + 1.0), 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        normalize(&mut v);
        store
            .upsert("ghap_full", &format!("east_{i}"), v, tier("gold"))
            .await
            .unwrap();
    }
    for i in 0..11 {
        let mut v = vec![0.01 * (i as f32 + 1.0), 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        normalize(&mut v);
        store
            .upsert("ghap_full", &format!("north_{i}"), v, tier("bronze"))
            .await
            .unwrap();
    }
    for (i, x) in [-1.0_f32, -0.7].into_iter().enumerate() {
        let mut v = vec![x, -0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        normalize(&mut v);
        store
            .upsert("ghap_full", &format!("outlier_{i}"), v, tier("silver"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn s4_value_validation_threshold() {
    let stack = stack();
    seed_axis(&stack.store).await;

    // Near candidate: accepted, and anything stored re-validates
    let outcome = stack
        .value_store
        .validate_candidate("east: verify invalidation fan-out first", "full_0")
        .await
        .unwrap();
    assert!(outcome.valid, "metrics: {:?}", outcome.metrics);
    assert!(outcome.metrics.distance <= outcome.metrics.threshold);
    assert!(
        (outcome.metrics.threshold
            - (outcome.metrics.mean_distance + 0.5 * outcome.metrics.std_distance))
            .abs()
            < 0.0001
    );

    let record = stack
        .value_store
        .store_value("east: verify invalidation fan-out first", "full_0", Axis::Full)
        .await
        .unwrap();
    let recheck = stack
        .value_store
        .validate_candidate(&record.text, &record.cluster_id)
        .await
        .unwrap();
    assert!(recheck.valid);

    // Far candidate: rejected with the distance reason
    let outcome = stack
        .value_store
        .validate_candidate("north star thinking", "full_0")
        .await
        .unwrap();
    assert!(!outcome.valid);
    assert!(outcome
        .reason
        .as_deref()
        .unwrap()
        .contains("too far from centroid"));
}

#[tokio::test]
async fn s4_insufficient_data_below_twenty() {
    let stack = stack();
    stack
        .store
        .create_collection("ghap_full", 8, engram_core::Distance::Cosine)
        .await
        .unwrap();
    for i in 0..19 {
        let mut v = vec![1.0, i as f32 * 0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        normalize(&mut v);
        stack
            .store
            .upsert("ghap_full", &format!("p{i}"), v, Payload::new())
            .await
            .unwrap();
    }
    let result = stack.clusterer.cluster_axis(Axis::Full).await;
    assert!(matches!(
        result,
        Err(engram_core::ClusterError::InsufficientData { found: 19, required: 20 })
    ));
}

// ============================================================================
// S5 - hybrid boost
// ============================================================================

#[tokio::test]
async fn s5_hybrid_boost() {
    let stack = stack();
    stack
        .store
        .create_collection("memories", 8, engram_core::Distance::Cosine)
        .await
        .unwrap();

    // Semantic similarity to the query vector is 0.70 by construction,
    // and the content contains the query for a keyword hit.
    let query = "east anchor query";
    let query_vector = MockEmbedder::new(8).embed(query).await.unwrap();
    let mut doc_vector = vec![0.0_f32; 8];
    // Rotate within the (e0, e2) plane spanned with the query direction
    let mut orthogonal = vec![0.0_f32; 8];
    orthogonal[2] = 1.0;
    for i in 0..8 {
        doc_vector[i] = 0.70 * query_vector[i] + (1.0 - 0.49_f32).sqrt() * orthogonal[i];
    }
    normalize(&mut doc_vector);

    let payload: Payload = serde_json::json!({
        "content": "east anchor query appears verbatim in this memory",
        "category": "fact",
    })
    .as_object()
    .unwrap()
    .clone();
    stack
        .store
        .upsert("memories", "doc", doc_vector, payload)
        .await
        .unwrap();

    let results = stack
        .searcher
        .search_memories(query, None, 10, SearchMode::Hybrid)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    // min(0.70 + 0.15, 1.0) = 0.85
    assert!(
        (results[0].score - 0.85).abs() < 0.01,
        "got {}",
        results[0].score
    );
}

// ============================================================================
// S6 - orphan adoption
// ============================================================================

#[tokio::test]
async fn s6_orphan_adoption() {
    let stack = stack();

    let entry = stack
        .collector
        .create(
            Domain::Feature,
            Strategy::ResearchFirst,
            "ship exports",
            "H",
            "A",
            "P",
        )
        .await
        .unwrap();
    let s1 = entry.session_id.clone();

    // A new session starts without the entry being resolved
    let s2 = stack.collector.start_session().await.unwrap();
    assert_ne!(s1, s2);
    assert!(stack.collector.has_orphaned_entry().await.unwrap());

    let orphan = stack.collector.get_orphaned_entry().await.unwrap().unwrap();
    assert_eq!(orphan.session_id, s1);

    let adopted = stack.collector.adopt_orphan().await.unwrap().unwrap();
    assert_eq!(adopted.session_id, s2);
    assert_eq!(adopted.id, entry.id);
    assert_eq!(adopted.created_at, entry.created_at);
    assert_eq!(adopted.goal, entry.goal);
    assert_eq!(adopted.hypothesis, entry.hypothesis);
    assert_eq!(adopted.iteration_count, entry.iteration_count);
    assert!(!stack.collector.has_orphaned_entry().await.unwrap());
}
