//! Overlap detection against the knowledge base.
//!
//! | condition                                    | action            |
//! |----------------------------------------------|-------------------|
//! | similarity > 0.90 and overlap > 0.80         | merge             |
//! | candidate content ⊆ entry content            | deprecate-subset  |
//! | similarity > 0.75 and unique ratio < 0.3     | merge             |
//! | similarity > 0.60                            | differentiate     |
//! | otherwise                                    | none              |
//!
//! Every entry at or above the floor is reported, not just the winner.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DedupConfig;
use crate::error::Result;
use crate::knowledge::{KnowledgeBase, SkillRule};
use crate::utils::jaccard;
use crate::validation::{SimilarityModel, TermFrequencyModel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DedupAction {
    Merge { entry_id: String },
    DeprecateSubset { entry_id: String },
    Differentiate {
        entry_id: String,
        /// Scope tokens the candidate has and the entry lacks.
        proposed_scope: Vec<String>,
    },
    None,
}

impl DedupAction {
    fn rank(&self) -> u8 {
        match self {
            Self::Merge { .. } => 0,
            Self::DeprecateSubset { .. } => 1,
            Self::Differentiate { .. } => 2,
            Self::None => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapMatch {
    pub entry_id: String,
    pub similarity: f32,
    pub overlap: f32,
    pub unique_ratio: f32,
    pub subset: bool,
    pub action: DedupAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    pub candidate_id: String,
    /// Similarity descending, ties by entry id.
    pub matches: Vec<OverlapMatch>,
    pub decision: DedupAction,
}

pub struct Deduplicator {
    config: DedupConfig,
    similarity: Arc<dyn SimilarityModel>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            similarity: Arc::new(TermFrequencyModel),
        }
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Fetch related entries from `kb` and check against them.
    pub async fn check_against(
        &self,
        candidate: &SkillRule,
        kb: &dyn KnowledgeBase,
    ) -> Result<DedupReport> {
        let existing = kb.get_similar(candidate).await?;
        self.check(candidate, &existing).await
    }

    pub async fn check(
        &self,
        candidate: &SkillRule,
        existing: &[SkillRule],
    ) -> Result<DedupReport> {
        let candidate_text = candidate.content_text();
        let candidate_tokens = candidate.content_tokens();
        let candidate_conditions = candidate.conditions.tokens();

        let mut matches = Vec::new();
        for entry in existing {
            let similarity = self
                .similarity
                .similarity(&candidate_text, &entry.content_text())
                .await?
                .clamp(0.0, 1.0);
            if similarity < self.config.floor {
                continue;
            }

            let entry_tokens = entry.content_tokens();
            let entry_conditions = entry.conditions.tokens();
            let overlap = jaccard(&candidate_conditions, &entry_conditions);
            let unique = candidate_tokens.difference(&entry_tokens).count();
            let unique_ratio = if candidate_tokens.is_empty() {
                0.0
            } else {
                unique as f32 / candidate_tokens.len() as f32
            };
            let subset = !candidate_tokens.is_empty() && unique == 0;

            let scope = || {
                proposed_scope(
                    &candidate_conditions,
                    &entry_conditions,
                    &candidate_tokens,
                    &entry_tokens,
                )
            };
            let action = self.classify(similarity, overlap, unique_ratio, subset, scope, &entry.id);

            matches.push(OverlapMatch {
                entry_id: entry.id.clone(),
                similarity,
                overlap,
                unique_ratio,
                subset,
                action,
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });

        let decision = matches
            .iter()
            .min_by_key(|m| m.action.rank())
            .map(|m| m.action.clone())
            .unwrap_or(DedupAction::None);

        debug!(
            candidate_id = %candidate.id,
            matches = matches.len(),
            decision = ?decision,
            "Dedup check complete"
        );

        Ok(DedupReport {
            candidate_id: candidate.id.clone(),
            matches,
            decision,
        })
    }

    /// The decision table for one entry.
    pub fn classify(
        &self,
        similarity: f32,
        overlap: f32,
        unique_ratio: f32,
        subset: bool,
        scope: impl FnOnce() -> Vec<String>,
        entry_id: &str,
    ) -> DedupAction {
        let c = &self.config;
        let entry_id = entry_id.to_string();
        if similarity > c.merge_similarity && overlap > c.merge_overlap {
            DedupAction::Merge { entry_id }
        } else if subset {
            DedupAction::DeprecateSubset { entry_id }
        } else if similarity > c.near_merge_similarity && unique_ratio < c.low_unique_ratio {
            DedupAction::Merge { entry_id }
        } else if similarity > c.floor {
            DedupAction::Differentiate {
                entry_id,
                proposed_scope: scope(),
            }
        } else {
            DedupAction::None
        }
    }
}

/// Condition tokens unique to the candidate; content tokens when the
/// conditions are identical.
fn proposed_scope(
    candidate_conditions: &[String],
    entry_conditions: &[String],
    candidate_tokens: &BTreeSet<String>,
    entry_tokens: &BTreeSet<String>,
) -> Vec<String> {
    let scope: Vec<String> = candidate_conditions
        .iter()
        .filter(|t| !entry_conditions.contains(t))
        .cloned()
        .collect();
    if !scope.is_empty() {
        return scope;
    }
    candidate_tokens.difference(entry_tokens).cloned().collect()
}
