use serde::{Deserialize, Serialize};

use crate::evidence::FragmentRef;
use crate::redaction::TaintSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Accessibility,
    Build,
    Test,
    Typing,
    Dependency,
    Performance,
    Security,
    Styling,
    Config,
    General,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accessibility => "accessibility",
            Self::Build => "build",
            Self::Test => "test",
            Self::Typing => "typing",
            Self::Dependency => "dependency",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Styling => "styling",
            Self::Config => "config",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeHint {
    Success,
    Failure,
    #[default]
    Unknown,
}

impl std::fmt::Display for OutcomeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Similarity key of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Classifier {
    pub domain: Domain,
    pub problem_class: String,
    pub solution_shape: String,
}

impl std::fmt::Display for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.domain, self.problem_class, self.solution_shape
        )
    }
}

/// Outcome evidence gathered around a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSignals {
    pub hint: OutcomeHint,
    /// A test or build success cue followed the fix.
    pub tests_passed: bool,
    /// The user confirmed the fix.
    pub user_confirmed: bool,
}

/// Structural description of one fix fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralPattern {
    /// Unique per fragment: hash of fingerprint and fragment ref.
    pub id: String,
    /// Identical for identical content regardless of where it came from.
    pub fingerprint: String,
    pub classifier: Classifier,
    /// `domain/problem/shape`
    pub signature: String,
    pub search_terms: Vec<String>,
    pub keywords: Vec<String>,
    pub solution_phrase: String,
    /// Redacted text of the fix fragment.
    pub excerpt: String,
    pub outcome: OutcomeSignals,
    pub file_type: Option<String>,
    /// The fix fragment.
    pub fragment: FragmentRef,
    /// Neighbouring fragments whose text contributed (problem or outcome cues).
    pub context: Vec<FragmentRef>,
    /// Union of the taint of every contributing fragment.
    pub taint: TaintSet,
}

impl StructuralPattern {
    pub fn transcript_id(&self) -> &str {
        &self.fragment.transcript_id
    }

    /// Every fragment this pattern was derived from, fix fragment first.
    pub fn sources(&self) -> impl Iterator<Item = &FragmentRef> {
        std::iter::once(&self.fragment).chain(self.context.iter())
    }

    /// Deterministic ordering: earliest transcript, then message.
    pub fn order_key(&self) -> (&str, usize) {
        (&self.fragment.transcript_id, self.fragment.range.message_index)
    }
}
