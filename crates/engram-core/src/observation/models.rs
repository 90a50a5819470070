//! GHAP entry - the fundamental unit of observation
//!
//! A GHAP entry tracks one working hypothesis: the Goal being pursued,
//! the Hypothesis held, the Action taken, and the Prediction made.
//! Resolving the entry seals it with an outcome and a confidence tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length for free-text fields; longer input is silently truncated.
pub const MAX_TEXT_LENGTH: usize = 10_000;

// ============================================================================
// CLOSED ENUMS
// ============================================================================

/// Problem domain of a GHAP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Debugging,
    Refactoring,
    Feature,
    Testing,
    Configuration,
    Documentation,
    Performance,
    Security,
    Integration,
}

impl Domain {
    /// All variants, in schema order
    pub const ALL: [Domain; 9] = [
        Domain::Debugging,
        Domain::Refactoring,
        Domain::Feature,
        Domain::Testing,
        Domain::Configuration,
        Domain::Documentation,
        Domain::Performance,
        Domain::Security,
        Domain::Integration,
    ];

    /// Wire name (kebab-case)
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Debugging => "debugging",
            Domain::Refactoring => "refactoring",
            Domain::Feature => "feature",
            Domain::Testing => "testing",
            Domain::Configuration => "configuration",
            Domain::Documentation => "documentation",
            Domain::Performance => "performance",
            Domain::Security => "security",
            Domain::Integration => "integration",
        }
    }

    /// Parse from a wire name, `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|d| d.as_str() == s).copied()
    }

    /// Wire names for all variants (used to generate tool schemas)
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|d| d.as_str()).collect()
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Problem-solving strategy of a GHAP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    SystematicElimination,
    TrialAndError,
    ResearchFirst,
    DivideAndConquer,
    RootCauseAnalysis,
    CopyFromSimilar,
    CheckAssumptions,
    ReadTheError,
    AskUser,
}

impl Strategy {
    /// All variants, in schema order
    pub const ALL: [Strategy; 9] = [
        Strategy::SystematicElimination,
        Strategy::TrialAndError,
        Strategy::ResearchFirst,
        Strategy::DivideAndConquer,
        Strategy::RootCauseAnalysis,
        Strategy::CopyFromSimilar,
        Strategy::CheckAssumptions,
        Strategy::ReadTheError,
        Strategy::AskUser,
    ];

    /// Wire name (kebab-case)
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SystematicElimination => "systematic-elimination",
            Strategy::TrialAndError => "trial-and-error",
            Strategy::ResearchFirst => "research-first",
            Strategy::DivideAndConquer => "divide-and-conquer",
            Strategy::RootCauseAnalysis => "root-cause-analysis",
            Strategy::CopyFromSimilar => "copy-from-similar",
            Strategy::CheckAssumptions => "check-assumptions",
            Strategy::ReadTheError => "read-the-error",
            Strategy::AskUser => "ask-user",
        }
    }

    /// Parse from a wire name, `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|v| v.as_str() == s).copied()
    }

    /// Wire names for all variants (used to generate tool schemas)
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.as_str()).collect()
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolution status of a sealed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Confirmed,
    Falsified,
    Abandoned,
}

impl OutcomeStatus {
    pub const ALL: [OutcomeStatus; 3] = [
        OutcomeStatus::Confirmed,
        OutcomeStatus::Falsified,
        OutcomeStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Confirmed => "confirmed",
            OutcomeStatus::Falsified => "falsified",
            OutcomeStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|v| v.as_str() == s).copied()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.as_str()).collect()
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a hypothesis turned out wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootCauseCategory {
    WrongAssumption,
    MissingInformation,
    ExternalDependency,
    RaceCondition,
    Environmental,
    IntegrationMismatch,
    Oversight,
    Other,
}

impl RootCauseCategory {
    pub const ALL: [RootCauseCategory; 8] = [
        RootCauseCategory::WrongAssumption,
        RootCauseCategory::MissingInformation,
        RootCauseCategory::ExternalDependency,
        RootCauseCategory::RaceCondition,
        RootCauseCategory::Environmental,
        RootCauseCategory::IntegrationMismatch,
        RootCauseCategory::Oversight,
        RootCauseCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RootCauseCategory::WrongAssumption => "wrong-assumption",
            RootCauseCategory::MissingInformation => "missing-information",
            RootCauseCategory::ExternalDependency => "external-dependency",
            RootCauseCategory::RaceCondition => "race-condition",
            RootCauseCategory::Environmental => "environmental",
            RootCauseCategory::IntegrationMismatch => "integration-mismatch",
            RootCauseCategory::Oversight => "oversight",
            RootCauseCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|v| v.as_str() == s).copied()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.as_str()).collect()
    }
}

impl std::fmt::Display for RootCauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse quality label assigned at resolve time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Gold,
    Silver,
    Bronze,
    Abandoned,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Gold => "gold",
            ConfidenceTier::Silver => "silver",
            ConfidenceTier::Bronze => "bronze",
            ConfidenceTier::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gold" => Some(ConfidenceTier::Gold),
            "silver" => Some(ConfidenceTier::Silver),
            "bronze" => Some(ConfidenceTier::Bronze),
            "abandoned" => Some(ConfidenceTier::Abandoned),
            _ => None,
        }
    }

    /// Numeric weight used when averaging cluster confidence
    pub fn weight(&self) -> f32 {
        match self {
            ConfidenceTier::Gold => 1.0,
            ConfidenceTier::Silver => 0.7,
            ConfidenceTier::Bronze => 0.4,
            ConfidenceTier::Abandoned => 0.0,
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NESTED RECORDS
// ============================================================================

/// One superseded (hypothesis, action, prediction) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub hypothesis: String,
    pub action: String,
    pub prediction: String,
}

/// Resolution record, set exactly once by resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub result: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub auto_captured: bool,
}

/// Root cause analysis for falsified hypotheses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub category: RootCauseCategory,
    pub description: String,
}

/// Lesson extracted at resolve time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub what_worked: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub takeaway: Option<String>,
}

// ============================================================================
// GHAP ENTRY
// ============================================================================

/// A tracked hypothesis within a session
///
/// Invariant: `iteration_count == 1 + history.len()`. A resolved entry
/// (outcome set) is immutable and appended to the session archive
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhapEntry {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub domain: Domain,
    pub strategy: Strategy,
    pub goal: String,
    pub hypothesis: String,
    pub action: String,
    pub prediction: String,
    pub iteration_count: u32,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surprise: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<Lesson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_tier: Option<ConfidenceTier>,
}

impl GhapEntry {
    /// True once the entry has been sealed by resolve
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Truncate text to [`MAX_TEXT_LENGTH`] characters, on a char boundary
pub fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_LENGTH {
        return text.to_string();
    }
    text.chars().take(MAX_TEXT_LENGTH).collect()
}

/// Compute the confidence tier for a resolved entry.
///
/// - auto-captured and confirmed: gold
/// - confirmed, or falsified with full analysis (surprise + root cause
///   + lesson): silver
/// - falsified with partial analysis: bronze
/// - abandoned: abandoned
pub fn compute_confidence_tier(entry: &GhapEntry) -> ConfidenceTier {
    let Some(outcome) = &entry.outcome else {
        return ConfidenceTier::Bronze;
    };

    match outcome.status {
        OutcomeStatus::Abandoned => ConfidenceTier::Abandoned,
        OutcomeStatus::Confirmed => {
            if outcome.auto_captured {
                ConfidenceTier::Gold
            } else {
                ConfidenceTier::Silver
            }
        }
        OutcomeStatus::Falsified => {
            let has_surprise = entry.surprise.as_deref().is_some_and(|s| !s.is_empty());
            if has_surprise && entry.root_cause.is_some() && entry.lesson.is_some() {
                ConfidenceTier::Silver
            } else {
                ConfidenceTier::Bronze
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
