use serde::{Deserialize, Serialize};

use crate::evidence::FragmentRef;
use crate::features::{Domain, StructuralPattern};
use crate::redaction::{SafetyPredicate, TaintLabel, TaintSet};
use crate::uncertainty::UncertaintyReason;

/// Where a generalized rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicabilityConditions {
    pub domain: Domain,
    pub problem_class: String,
    pub solution_shape: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl ApplicabilityConditions {
    /// The rule's problem setting covers this pattern.
    pub fn applies_to(&self, pattern: &StructuralPattern) -> bool {
        pattern.classifier.domain == self.domain
            && pattern.classifier.problem_class == self.problem_class
            && self
                .file_type
                .as_ref()
                .is_none_or(|ft| pattern.file_type.as_ref() == Some(ft))
    }

    /// Flat condition tokens, used for structural overlap.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = vec![
            format!("domain:{}", self.domain),
            format!("problem:{}", self.problem_class),
            format!("shape:{}", self.solution_shape),
        ];
        if let Some(ft) = &self.file_type {
            tokens.push(format!("file:{}", ft));
        }
        tokens
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScores {
    pub coverage: f32,
    pub predictive_power: f32,
    pub coherence: f32,
    pub specificity: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterexampleKind {
    /// The member's problem setting is outside the rule's conditions.
    NotApplicable,
    /// Same problem, different fix.
    ShapeMismatch,
    /// Same fix, but it did not work.
    OutcomeFailure,
}

impl std::fmt::Display for CounterexampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotApplicable => write!(f, "not_applicable"),
            Self::ShapeMismatch => write!(f, "shape_mismatch"),
            Self::OutcomeFailure => write!(f, "outcome_failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
    pub pattern_id: String,
    pub fragment: FragmentRef,
    pub kind: CounterexampleKind,
    pub confidence: f32,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum MissingSignal {
    NoPassingTests,
    NoUserConfirmation,
    TooFewInstances { have: usize, need: usize },
    LowCoherence,
    ConflictingOutcomes,
}

impl std::fmt::Display for MissingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPassingTests => write!(f, "no passing-test evidence"),
            Self::NoUserConfirmation => write!(f, "no user confirmation"),
            Self::TooFewInstances { have, need } => {
                write!(f, "too few instances ({} of {})", have, need)
            }
            Self::LowCoherence => write!(f, "low coherence"),
            Self::ConflictingOutcomes => write!(f, "conflicting outcomes"),
        }
    }
}

/// Candidate rule generalized from one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralPattern {
    pub id: String,
    pub principle: String,
    pub signature: String,
    pub conditions: ApplicabilityConditions,
    pub solution_phrase: String,
    pub scores: ConfidenceScores,
    pub counterexamples: Vec<Counterexample>,
    /// Distinct transcripts among the members.
    pub instance_count: usize,
    /// Those transcripts' ids, sorted.
    #[serde(default)]
    pub transcripts: Vec<String>,
    /// Pattern ids of every member, in cluster order.
    pub members: Vec<String>,
    /// Pattern ids of members that apply and were correct.
    pub supporting: Vec<String>,
    pub taint: TaintSet,
    pub missing_signals: Vec<MissingSignal>,
    #[serde(default)]
    pub critique_notes: Vec<String>,
}

impl GeneralPattern {
    pub fn confidence(&self) -> f32 {
        self.scores.confidence
    }

    /// Counterexamples at or above the given confidence.
    pub fn strong_counterexamples(&self, min_confidence: f32) -> usize {
        self.counterexamples
            .iter()
            .filter(|c| c.confidence >= min_confidence)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub predicate: SafetyPredicate,
    pub label: TaintLabel,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} violates {}", self.label, self.predicate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Promote(GeneralPattern),
    Defer {
        candidate: GeneralPattern,
        reason: UncertaintyReason,
    },
    DroppedForSafety {
        candidate_id: String,
        violations: Vec<SafetyViolation>,
    },
}

impl Verdict {
    pub fn candidate(&self) -> Option<&GeneralPattern> {
        match self {
            Self::Promote(candidate) | Self::Defer { candidate, .. } => Some(candidate),
            Self::DroppedForSafety { .. } => None,
        }
    }

    pub fn is_promote(&self) -> bool {
        matches!(self, Self::Promote(_))
    }
}
