use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::StructuralPattern;

/// Index of a pattern in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(usize);

impl PatternId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Append-only pattern storage. Clusters refer to members by `PatternId`,
/// so ids stay valid across re-clustering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<StructuralPattern>", into = "Vec<StructuralPattern>")]
pub struct PatternArena {
    patterns: Vec<StructuralPattern>,
    by_key: HashMap<String, PatternId>,
}

impl PatternArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pattern. Re-inserting the same pattern id returns the
    /// existing slot.
    pub fn insert(&mut self, pattern: StructuralPattern) -> PatternId {
        if let Some(id) = self.by_key.get(&pattern.id) {
            return *id;
        }
        let id = PatternId(self.patterns.len());
        self.by_key.insert(pattern.id.clone(), id);
        self.patterns.push(pattern);
        id
    }

    pub fn get(&self, id: PatternId) -> Option<&StructuralPattern> {
        self.patterns.get(id.0)
    }

    pub fn find(&self, pattern_id: &str) -> Option<PatternId> {
        self.by_key.get(pattern_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PatternId, &StructuralPattern)> {
        self.patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (PatternId(i), p))
    }

    /// Ids ordered by (transcript id, message index).
    pub fn ordered_ids(&self) -> Vec<PatternId> {
        let mut ids: Vec<PatternId> = (0..self.patterns.len()).map(PatternId).collect();
        ids.sort_by(|a, b| {
            self.patterns[a.0]
                .order_key()
                .cmp(&self.patterns[b.0].order_key())
        });
        ids
    }

    /// Resolve ids, skipping any that do not belong to this arena.
    pub fn resolve<'a>(
        &'a self,
        ids: &'a [PatternId],
    ) -> impl Iterator<Item = &'a StructuralPattern> {
        ids.iter().filter_map(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl From<Vec<StructuralPattern>> for PatternArena {
    fn from(patterns: Vec<StructuralPattern>) -> Self {
        let mut arena = Self::new();
        for pattern in patterns {
            arena.insert(pattern);
        }
        arena
    }
}

impl From<PatternArena> for Vec<StructuralPattern> {
    fn from(arena: PatternArena) -> Self {
        arena.patterns
    }
}
