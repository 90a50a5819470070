//! Observation - the GHAP journal and its persister
//!
//! The collector is the local state machine over the filesystem
//! journal; the persister projects resolved entries into the vector
//! store.

pub mod collector;
pub mod models;
pub mod persister;

pub use collector::{
    GhapResolution, GhapUpdate, JournalError, JournalResult, ObservationCollector,
};
pub use models::{
    compute_confidence_tier, truncate_text, ConfidenceTier, Domain, GhapEntry, HistoryEntry,
    Lesson, Outcome, OutcomeStatus, RootCause, RootCauseCategory, Strategy, MAX_TEXT_LENGTH,
};
pub use persister::{
    build_axis_payload, build_payload, determine_axes, render_axis, ObservationPersister,
    PersistError,
};
