use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::TaintPolicyConfig;
use crate::evidence::Role;

/// Provenance label carried by text through every transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaintLabel {
    ToolOutput,
    UserText,
    AssistantGenerated,
    ContainsSecret,
    ContainsInjection,
    ContainsPii,
}

impl std::fmt::Display for TaintLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolOutput => write!(f, "tool-output"),
            Self::UserText => write!(f, "user-text"),
            Self::AssistantGenerated => write!(f, "assistant-generated"),
            Self::ContainsSecret => write!(f, "contains-secret"),
            Self::ContainsInjection => write!(f, "contains-injection"),
            Self::ContainsPii => write!(f, "contains-pii"),
        }
    }
}

/// Ordered set of taint labels. Combining sets is always a union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaintSet(BTreeSet<TaintLabel>);

impl TaintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_role(role: Role) -> Self {
        let mut set = Self::new();
        match role {
            Role::User => set.insert(TaintLabel::UserText),
            Role::Assistant => set.insert(TaintLabel::AssistantGenerated),
            Role::Tool => set.insert(TaintLabel::ToolOutput),
            Role::System => {}
        }
        set
    }

    pub fn insert(&mut self, label: TaintLabel) {
        self.0.insert(label);
    }

    pub fn with(mut self, label: TaintLabel) -> Self {
        self.insert(label);
        self
    }

    pub fn contains(&self, label: TaintLabel) -> bool {
        self.0.contains(&label)
    }

    pub fn union(&self, other: &TaintSet) -> TaintSet {
        TaintSet(self.0.union(&other.0).copied().collect())
    }

    pub fn union_all<'a>(sets: impl IntoIterator<Item = &'a TaintSet>) -> TaintSet {
        sets.into_iter()
            .fold(TaintSet::new(), |acc, set| acc.union(set))
    }

    pub fn iter(&self) -> impl Iterator<Item = TaintLabel> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for TaintSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self.iter().map(|l| l.to_string()).collect();
        write!(f, "{{{}}}", labels.join(", "))
    }
}

impl FromIterator<TaintLabel> for TaintSet {
    fn from_iter<I: IntoIterator<Item = TaintLabel>>(iter: I) -> Self {
        TaintSet(iter.into_iter().collect())
    }
}

/// Safety gates that decide what may reach a promoted rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPredicate {
    /// Text may be placed in a prompt for an external describe/critique step.
    SafeForPrompt,
    /// Text may be stored as a rule body or evidence excerpt.
    SafeForEvidence,
}

impl std::fmt::Display for SafetyPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SafeForPrompt => write!(f, "safe-for-prompt"),
            Self::SafeForEvidence => write!(f, "safe-for-evidence"),
        }
    }
}

/// Evaluates safety predicates against taint sets.
#[derive(Debug, Clone, Default)]
pub struct TaintPolicy {
    config: TaintPolicyConfig,
}

impl TaintPolicy {
    pub fn new(config: TaintPolicyConfig) -> Self {
        Self { config }
    }

    fn label_allowed(&self, predicate: SafetyPredicate, label: TaintLabel) -> bool {
        match (predicate, label) {
            (_, TaintLabel::ContainsSecret) | (_, TaintLabel::ContainsInjection) => false,
            (SafetyPredicate::SafeForEvidence, TaintLabel::ContainsPii) => {
                self.config.allow_pii_in_evidence
            }
            (SafetyPredicate::SafeForPrompt, TaintLabel::ContainsPii) => {
                self.config.allow_pii_in_prompt
            }
            (SafetyPredicate::SafeForPrompt, TaintLabel::ToolOutput) => {
                self.config.allow_tool_output_in_prompt
            }
            (SafetyPredicate::SafeForEvidence, TaintLabel::ToolOutput)
            | (_, TaintLabel::UserText)
            | (_, TaintLabel::AssistantGenerated) => true,
        }
    }

    /// Labels in `taint` that violate `predicate`. Empty means safe.
    pub fn violations(&self, predicate: SafetyPredicate, taint: &TaintSet) -> Vec<TaintLabel> {
        taint
            .iter()
            .filter(|label| !self.label_allowed(predicate, *label))
            .collect()
    }

    pub fn allows(&self, predicate: SafetyPredicate, taint: &TaintSet) -> bool {
        self.violations(predicate, taint).is_empty()
    }
}
