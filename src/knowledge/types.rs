use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{extract_keywords, is_function_word, jaccard};
use crate::validation::{ApplicabilityConditions, ConfidenceScores, GeneralPattern};

/// Solution keyword overlap at which two rules count as related even when
/// their classifiers share nothing.
pub const RELATED_KEYWORD_OVERLAP: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Deprecated,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(format!("unknown rule status: {}", other)),
        }
    }
}

/// A promoted rule as stored in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRule {
    pub id: String,
    pub principle: String,
    pub signature: String,
    pub conditions: ApplicabilityConditions,
    pub solution_phrase: String,
    /// Redacted excerpt of the representative fix.
    pub excerpt: String,
    pub scores: ConfidenceScores,
    pub instance_count: usize,
    pub members: Vec<String>,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SkillRule {
    pub fn from_candidate(candidate: &GeneralPattern, excerpt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: candidate.id.clone(),
            principle: candidate.principle.clone(),
            signature: candidate.signature.clone(),
            conditions: candidate.conditions.clone(),
            solution_phrase: candidate.solution_phrase.clone(),
            excerpt: excerpt.into(),
            scores: candidate.scores,
            instance_count: candidate.instance_count,
            members: candidate.members.clone(),
            status: RuleStatus::Active,
            superseded_by: None,
            notes: candidate.critique_notes.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.scores.confidence
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Text compared by the semantic similarity model.
    pub fn content_text(&self) -> String {
        format!(
            "{} {} {}",
            self.conditions.problem_class, self.conditions.solution_shape, self.solution_phrase
        )
    }

    /// Content keywords plus condition tokens.
    pub fn content_tokens(&self) -> BTreeSet<String> {
        let mut tokens: BTreeSet<String> = extract_keywords(&self.solution_phrase)
            .into_iter()
            .filter(|w| !is_function_word(w))
            .collect();
        tokens.extend(self.conditions.tokens());
        tokens
    }

    /// Fold a duplicate into this rule.
    pub fn absorb(&mut self, other: &SkillRule) {
        let mut members: BTreeSet<String> = self.members.iter().cloned().collect();
        members.extend(other.members.iter().cloned());
        self.members = members.into_iter().collect();
        self.instance_count = self.instance_count.max(other.instance_count);
        if other.confidence() > self.confidence() {
            self.scores = other.scores;
        }
        for note in &other.notes {
            if !self.notes.contains(note) {
                self.notes.push(note.clone());
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn deprecate(&mut self, superseded_by: impl Into<String>) {
        self.status = RuleStatus::Deprecated;
        self.superseded_by = Some(superseded_by.into());
        self.updated_at = Utc::now();
    }

    /// Shares domain, problem class or solution shape with `other`, or
    /// describes a near-identical solution under a different classification.
    pub fn is_related(&self, other: &SkillRule) -> bool {
        self.conditions.domain == other.conditions.domain
            || self.conditions.problem_class == other.conditions.problem_class
            || self.conditions.solution_shape == other.conditions.solution_shape
            || jaccard(&self.solution_keywords(), &other.solution_keywords())
                >= RELATED_KEYWORD_OVERLAP
    }

    fn solution_keywords(&self) -> Vec<String> {
        extract_keywords(&self.solution_phrase)
            .into_iter()
            .filter(|w| !is_function_word(w))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
