//! Round-trip and idempotence laws: upsert/get, persist twice,
//! journal archive reload, and timestamp precision.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use engram_core::observation::{
    Domain, GhapResolution, GhapUpdate, ObservationCollector, ObservationPersister, OutcomeStatus,
    Strategy,
};
use engram_core::store::{Distance, Payload, VectorStore};
use engram_core::{EmbeddingService, InMemoryStore};

use engram_e2e_tests::{confirmed_entry, falsified_entry, MockEmbedder};
use tempfile::TempDir;

#[tokio::test]
async fn upsert_then_get_returns_payload_and_vector_exactly() {
    let store = InMemoryStore::new();
    store
        .create_collection("test", 4, Distance::Cosine)
        .await
        .unwrap();

    let payload: Payload = serde_json::json!({
        "text": "value text",
        "nested": {"list": [1, 2, 3], "flag": true},
        "score": 0.5,
    })
    .as_object()
    .unwrap()
    .clone();
    let vector = vec![0.1, 0.2, 0.3, 0.4];

    store
        .upsert("test", "row", vector.clone(), payload.clone())
        .await
        .unwrap();

    let record = store.get("test", "row", true).await.unwrap().unwrap();
    assert_eq!(record.payload, payload);
    assert_eq!(record.vector, Some(vector));
}

#[tokio::test]
async fn persist_twice_yields_identical_collection_contents() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let persister = ObservationPersister::new(embedder, store.clone());

    let entry = falsified_entry("ghap_20260101_080000_roundtrip");

    persister.persist(&entry).await.unwrap();
    let mut first = Vec::new();
    for collection in ["ghap_full", "ghap_strategy", "ghap_surprise", "ghap_root_cause"] {
        first.push(store.scroll(collection, 1000, None, true).await.unwrap());
    }

    persister.persist(&entry).await.unwrap();
    let mut second = Vec::new();
    for collection in ["ghap_full", "ghap_strategy", "ghap_surprise", "ghap_root_cause"] {
        second.push(store.scroll(collection, 1000, None, true).await.unwrap());
    }

    assert_eq!(first, second);
    assert!(first.iter().all(|rows| rows.len() == 1));
}

#[tokio::test]
async fn confirmed_entry_skips_surprise_collections() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let persister = ObservationPersister::new(embedder, store.clone());

    let entry = confirmed_entry("ghap_20260102_090000_confirmed");
    let axes = persister.persist(&entry).await.unwrap();
    assert_eq!(axes.len(), 2);

    assert_eq!(store.count("ghap_full", None).await.unwrap(), 1);
    assert_eq!(store.count("ghap_strategy", None).await.unwrap(), 1);
    assert_eq!(store.count("ghap_surprise", None).await.unwrap(), 0);
    assert_eq!(store.count("ghap_root_cause", None).await.unwrap(), 0);
}

#[tokio::test]
async fn journal_archive_reload_reproduces_resolved_entry() {
    let dir = TempDir::new().unwrap();
    let collector = ObservationCollector::new(dir.path().join("journal")).unwrap();

    collector
        .create(
            Domain::Testing,
            Strategy::TrialAndError,
            "stabilize flaky test",
            "ordering assumption",
            "pin the ordering",
            "test goes green",
        )
        .await
        .unwrap();
    collector
        .update(GhapUpdate {
            action: Some("sort before compare".to_string()),
            note: Some("repro rate one in five".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let resolved = collector
        .resolve(GhapResolution {
            status: OutcomeStatus::Confirmed,
            result: "green across 200 runs".to_string(),
            surprise: None,
            root_cause: None,
            lesson: None,
            auto_captured: true,
        })
        .await
        .unwrap();

    // Reload from the JSONL journal: byte-identical to the in-memory form
    let reloaded = collector.get_session_entries().await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0], resolved);

    // Rotate into the archive and reload from there too
    let session_id = collector.get_session_id().await.unwrap();
    collector.start_session().await.unwrap();
    let date = session_id.split('_').nth(1).unwrap().to_string();
    let archive = dir
        .path()
        .join("journal/archive")
        .join(format!("{date}_{session_id}.jsonl"));
    let line = std::fs::read_to_string(archive).unwrap();
    let from_archive: engram_core::GhapEntry =
        serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(from_archive, resolved);
}

#[tokio::test]
async fn iso_timestamps_round_trip_to_microseconds() {
    let original: DateTime<Utc> = "2026-03-01T10:30:45.123456+00:00".parse().unwrap();
    let iso = original.to_rfc3339();
    let back: DateTime<Utc> = DateTime::parse_from_rfc3339(&iso)
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(back, original);
}

#[tokio::test]
async fn epoch_timestamps_round_trip_to_seconds() {
    let original = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 45).unwrap();
    let epoch = original.timestamp() as f64;
    let back = Utc.timestamp_opt(epoch as i64, 0).single().unwrap();
    assert_eq!(back, original);
}

#[tokio::test]
async fn persisted_timestamps_round_trip_through_payload() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(MockEmbedder::new(8));
    let persister = ObservationPersister::new(embedder, store.clone());

    let entry = falsified_entry("ghap_20260101_080000_ts");
    persister.persist(&entry).await.unwrap();

    let record = store
        .get("ghap_full", &entry.id, false)
        .await
        .unwrap()
        .unwrap();

    // ISO form: exact
    let created: DateTime<Utc> =
        DateTime::parse_from_rfc3339(record.payload["created_at"].as_str().unwrap())
            .unwrap()
            .with_timezone(&Utc);
    assert_eq!(created, entry.created_at);

    // Epoch form: second precision
    let captured = record.payload["captured_at"].as_f64().unwrap();
    assert_eq!(
        captured as i64,
        entry.outcome.as_ref().unwrap().captured_at.timestamp()
    );
}

#[tokio::test]
async fn embedder_is_deterministic() {
    let embedder = MockEmbedder::new(8);
    let a = embedder.embed("same text").await.unwrap();
    let b = embedder.embed("same text").await.unwrap();
    assert_eq!(a, b);
    let c = embedder.embed("different text").await.unwrap();
    assert_ne!(a, c);
}
