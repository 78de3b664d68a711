//! Similarity clustering over structural patterns.
//!
//! Seeds are taken in (transcript id, message index) order; every unassigned
//! pattern whose weighted similarity to the seed clears the join threshold
//! joins it. Groups below the minimum size are not errors: groups of at least
//! `seed_floor` are returned as `undersized`, singletons stay unclustered.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClusteringConfig;
use crate::error::Result;
use crate::features::{Domain, PatternArena, PatternId, StructuralPattern};
use crate::pipeline::CancelSignal;
use crate::utils::{hash_parts, jaccard};

/// Conditions shared by every member of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConditions {
    pub domain: Option<Domain>,
    pub problem_class: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceCluster {
    pub id: String,
    pub members: Vec<PatternId>,
    pub representative: PatternId,
    pub conditions: ContextConditions,
}

impl InstanceCluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clustering {
    /// Clusters at or above the minimum size, primary first.
    pub clusters: Vec<InstanceCluster>,
    pub undersized: Vec<InstanceCluster>,
    pub unclustered: Vec<PatternId>,
}

impl Clustering {
    /// Largest cluster; ties go to the earliest transcript.
    pub fn primary(&self) -> Option<&InstanceCluster> {
        self.clusters.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    config: ClusteringConfig,
}

impl Clusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Weighted structural-tuple similarity in `[0, 1]`.
    pub fn similarity(&self, a: &StructuralPattern, b: &StructuralPattern) -> f32 {
        let c = &self.config;
        let matches = |same: bool| if same { 1.0_f32 } else { 0.0 };

        c.domain_weight * matches(a.classifier.domain == b.classifier.domain)
            + c.problem_weight * matches(a.classifier.problem_class == b.classifier.problem_class)
            + c.shape_weight * matches(a.classifier.solution_shape == b.classifier.solution_shape)
            + c.keyword_weight * jaccard(&a.keywords, &b.keywords)
    }

    pub fn cluster(&self, arena: &PatternArena, cancel: &CancelSignal) -> Result<Clustering> {
        let order = arena.ordered_ids();
        let mut assigned: BTreeSet<PatternId> = BTreeSet::new();
        let mut result = Clustering::default();

        for (pos, seed_id) in order.iter().enumerate() {
            cancel.checkpoint("clustering")?;
            if assigned.contains(seed_id) {
                continue;
            }
            let Some(seed) = arena.get(*seed_id) else {
                continue;
            };

            let mut members = vec![*seed_id];
            for candidate_id in &order[pos + 1..] {
                if assigned.contains(candidate_id) {
                    continue;
                }
                if let Some(candidate) = arena.get(*candidate_id)
                    && self.similarity(seed, candidate) >= self.config.join_threshold
                {
                    members.push(*candidate_id);
                }
            }
            assigned.extend(members.iter().copied());

            if members.len() >= self.config.min_cluster_size {
                result.clusters.push(self.build(arena, members));
            } else if members.len() >= self.config.seed_floor {
                result.undersized.push(self.build(arena, members));
            } else {
                result.unclustered.push(*seed_id);
            }
        }

        // Seeds were visited in transcript order, so a stable sort by size
        // keeps the earliest transcript first among equals.
        result
            .clusters
            .sort_by_key(|c| std::cmp::Reverse(c.size()));

        debug!(
            patterns = arena.len(),
            clusters = result.clusters.len(),
            undersized = result.undersized.len(),
            unclustered = result.unclustered.len(),
            "Clustering complete"
        );
        Ok(result)
    }

    fn build(&self, arena: &PatternArena, members: Vec<PatternId>) -> InstanceCluster {
        let patterns: Vec<&StructuralPattern> = arena.resolve(&members).collect();

        let mut representative = members[0];
        let mut best = f32::MIN;
        for (i, pattern) in patterns.iter().enumerate() {
            let others = patterns.len().saturating_sub(1);
            let mean = if others == 0 {
                1.0
            } else {
                patterns
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| self.similarity(pattern, other))
                    .sum::<f32>()
                    / others as f32
            };
            if mean > best {
                best = mean;
                representative = members[i];
            }
        }

        let member_keys: Vec<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        let id = hash_parts(&member_keys)[..16].to_string();

        InstanceCluster {
            id,
            conditions: shared_conditions(&patterns),
            members,
            representative,
        }
    }
}

fn shared<T: PartialEq + Clone>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut iter = values.into_iter();
    let first = iter.next()?;
    iter.all(|v| v == first).then_some(first)
}

fn shared_conditions(patterns: &[&StructuralPattern]) -> ContextConditions {
    ContextConditions {
        domain: shared(patterns.iter().map(|p| p.classifier.domain)),
        problem_class: shared(patterns.iter().map(|p| p.classifier.problem_class.clone())),
        file_type: shared(patterns.iter().map(|p| p.file_type.clone())).flatten(),
    }
}
