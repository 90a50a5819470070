//! # Engram Core
//!
//! Agent memory engine. Captures an agent's working hypotheses (GHAP
//! entries: Goal, Hypothesis, Action, Prediction), records their
//! outcomes, and persists them into a vector substrate under multiple
//! semantic projections, where they are clustered into stable patterns
//! and distilled into validated values.
//!
//! The moving parts:
//!
//! - **Observation**: a crash-safe filesystem journal of the active
//!   entry, its iteration history, and the session archive, plus the
//!   multi-axis persister that embeds resolved entries.
//! - **Store**: the [`store::VectorStore`] abstraction (collection
//!   lifecycle, upsert/search/scroll/filter semantics) with an
//!   in-memory reference implementation.
//! - **Metadata**: SQLite bookkeeping for incremental indexing.
//! - **Search**: one query surface over memories, code, experiences,
//!   values, and commits - semantic, keyword, or hybrid.
//! - **Clustering + values**: density clustering per axis and the
//!   distance-threshold test that admits a value candidate.
//! - **Context**: budgeted, deduplicated markdown packs for prompt
//!   injection, including the premortem variant.
//! - **Git**: commit indexing, churn metrics, and blame-aware search.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::observation::{ObservationCollector, GhapResolution};
//! use engram_core::observation::{Domain, OutcomeStatus, Strategy};
//!
//! let collector = ObservationCollector::new("/path/to/journal")?;
//! let entry = collector
//!     .create(Domain::Debugging, Strategy::ReadTheError,
//!             "fix the 500", "handler panics on empty body",
//!             "add a guard", "requests with empty bodies return 400")
//!     .await?;
//! let resolved = collector
//!     .resolve(GhapResolution {
//!         status: OutcomeStatus::Confirmed,
//!         result: "guard fixed it".into(),
//!         surprise: None, root_cause: None, lesson: None,
//!         auto_captured: false,
//!     })
//!     .await?;
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local fastembed-backed
//!   [`embeddings::LocalEmbedder`]

pub mod clustering;
pub mod collections;
pub mod context;
pub mod embeddings;
pub mod git;
pub mod ids;
pub mod memories;
pub mod metadata;
pub mod observation;
pub mod search;
pub mod store;
pub mod values;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use collections::Axis;

pub use observation::{
    ConfidenceTier, Domain, GhapEntry, GhapResolution, GhapUpdate, JournalError, Lesson,
    ObservationCollector, ObservationPersister, Outcome, OutcomeStatus, PersistError, RootCause,
    RootCauseCategory, Strategy,
};

pub use store::{
    Distance, Filters, InMemoryStore, Payload, StoreError, StoredRecord, VectorStore,
};

pub use embeddings::{cosine_distance, cosine_similarity, EmbeddingError, EmbeddingService};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;

pub use metadata::{GitIndexState, IndexedFile, MetadataError, MetadataStore, ProjectConfig};

pub use search::{
    CodeResult, CommitResult, ExperienceResult, MemoryResult, SearchError, SearchMode, Searcher,
    SearcherOps, ValueResult,
};

pub use clustering::{ClusterError, ClusterInfo, ClusteringConfig, ExperienceClusterer};

pub use values::{ValidationMetrics, ValidationOutcome, ValueError, ValueRecord, ValueStore};

pub use memories::{MemoryBank, MemoryCategory, MemoryError, MemoryRecord};

pub use context::{
    ContextAssembler, ContextConfig, ContextError, ContextItem, FormattedContext, SourceKind,
};

pub use git::{Commit, GitAnalyzer, GitError, GitReader, RepoReader};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
