use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{UncertaintyConfig, ValidationConfig};
use crate::validation::{Counterexample, GeneralPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyReason {
    InsufficientInstances,
    ConflictingEvidence,
    LowConfidence,
    OvergeneralizationFlagged,
    EvidenceTimeout,
}

impl UncertaintyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientInstances => "insufficient_instances",
            Self::ConflictingEvidence => "conflicting_evidence",
            Self::LowConfidence => "low_confidence",
            Self::OvergeneralizationFlagged => "overgeneralization_flagged",
            Self::EvidenceTimeout => "evidence_timeout",
        }
    }

    /// Reasons that only a clean validation pass can clear; more instances
    /// alone never promote such an item.
    pub fn needs_revalidation(&self) -> bool {
        matches!(self, Self::OvergeneralizationFlagged | Self::EvidenceTimeout)
    }
}

impl std::fmt::Display for UncertaintyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyStatus {
    #[default]
    Pending,
    /// Automatic resolution gave up; waits for a reviewer.
    Escalated,
    ResolvedPromote,
    ResolvedDiscard,
    /// Expired or evicted without a decision.
    Discarded,
}

impl UncertaintyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResolvedPromote | Self::ResolvedDiscard | Self::Discarded
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for UncertaintyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Escalated => write!(f, "escalated"),
            Self::ResolvedPromote => write!(f, "resolved_promote"),
            Self::ResolvedDiscard => write!(f, "resolved_discard"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// What it would take to decide the item either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionBoundary {
    pub instances_needed: usize,
    pub counterexample_would_discard: bool,
    pub target_confidence: f32,
}

impl DecisionBoundary {
    pub fn for_candidate(
        candidate: &GeneralPattern,
        uncertainty: &UncertaintyConfig,
        validation: &ValidationConfig,
    ) -> Self {
        Self {
            instances_needed: validation
                .min_instances
                .saturating_sub(candidate.instance_count),
            counterexample_would_discard: uncertainty.discard_on_counterexample
                && !candidate.counterexamples.is_empty(),
            target_confidence: validation.promote_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Look for more instances of the same fix working.
    Positive,
    /// Look for the fix failing or being reverted.
    Negative,
    /// Test the edges of the applicability conditions.
    Boundary,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Boundary => write!(f, "boundary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedQuery {
    pub id: String,
    pub kind: QueryKind,
    /// Search string for the evidence store.
    pub query: String,
    pub purpose: String,
    /// Higher runs first.
    pub priority: u32,
    #[serde(default)]
    pub executed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    /// Caller-chosen key; a repeated key is a no-op.
    pub key: String,
    pub at: DateTime<Utc>,
    pub positives_added: usize,
    pub counterexamples_added: usize,
    pub new_confidence: f32,
    pub note: String,
}

/// New evidence for a pending item.
#[derive(Debug, Clone, Default)]
pub struct EvidenceUpdate {
    pub key: String,
    pub positives: usize,
    /// Supporting transcripts; ids the item already counted add nothing.
    pub sources: Vec<String>,
    pub counterexamples: Vec<Counterexample>,
    pub confidence: Option<f32>,
    /// Re-validated candidate replacing the stored one.
    pub candidate: Option<GeneralPattern>,
    /// Why the re-validation deferred again, if it did.
    pub reason: Option<UncertaintyReason>,
    /// The re-validation ran every check and none of them objected.
    pub cleared: bool,
    /// Ids of suggested queries this evidence answers.
    pub queries_run: Vec<String>,
}

impl EvidenceUpdate {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_positives(mut self, positives: usize) -> Self {
        self.positives = positives;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_counterexamples(mut self, counterexamples: Vec<Counterexample>) -> Self {
        self.counterexamples = counterexamples;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_candidate(mut self, candidate: GeneralPattern) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn with_reason(mut self, reason: UncertaintyReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_clean_verdict(mut self) -> Self {
        self.cleared = true;
        self
    }

    pub fn with_queries_run(mut self, ids: Vec<String>) -> Self {
        self.queries_run = ids;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Promote,
    Discard,
}

impl Resolution {
    pub fn status(&self) -> UncertaintyStatus {
        match self {
            Self::Promote => UncertaintyStatus::ResolvedPromote,
            Self::Discard => UncertaintyStatus::ResolvedDiscard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyItem {
    pub id: String,
    pub candidate: GeneralPattern,
    pub reason: UncertaintyReason,
    pub boundary: DecisionBoundary,
    pub queries: Vec<SuggestedQuery>,
    pub status: UncertaintyStatus,
    pub confidence: f32,
    pub positive_instances: usize,
    /// Transcripts already counted in `positive_instances`.
    #[serde(default)]
    pub counted_transcripts: BTreeSet<String>,
    #[serde(default)]
    pub attempts: Vec<ResolutionAttempt>,
    pub progress_note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UncertaintyItem {
    pub fn is_pending(&self) -> bool {
        self.status == UncertaintyStatus::Pending
    }

    /// Pending or escalated: a reviewer can still decide it.
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Evidence may still settle the item without a reviewer.
    pub fn can_auto_resolve(&self, max_attempts: usize) -> bool {
        self.is_pending()
            && self.attempts.len() < max_attempts
            && self.queries.iter().any(|q| !q.executed)
    }

    pub fn has_attempt(&self, key: &str) -> bool {
        self.attempts.iter().any(|a| a.key == key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertaintyCounts {
    pub pending: usize,
    pub escalated: usize,
    pub resolved_promote: usize,
    pub resolved_discard: usize,
    pub discarded: usize,
}

impl UncertaintyCounts {
    pub fn total(&self) -> usize {
        self.pending
            + self.escalated
            + self.resolved_promote
            + self.resolved_discard
            + self.discarded
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_promoted: u64,
    pub total_discarded: u64,
    pub total_expired: u64,
    pub total_evicted: u64,
    pub total_escalated: u64,
    pub evidence_applied: u64,
}

/// Result of applying evidence or resolving an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub status: UncertaintyStatus,
    pub progress_note: String,
    /// False when the call was a repeat and nothing changed.
    pub changed: bool,
}
