//! Follow-up query planning for deferred candidates.

use std::collections::BTreeSet;

use super::types::{QueryKind, SuggestedQuery, UncertaintyReason};
use crate::config::UncertaintyConfig;
use crate::utils::{hash_parts, is_function_word};
use crate::validation::{CounterexampleKind, GeneralPattern, MissingSignal};

const KEY_TERMS: usize = 3;

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    min_queries: usize,
    max_queries: usize,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(&UncertaintyConfig::default())
    }
}

impl QueryPlanner {
    pub fn new(config: &UncertaintyConfig) -> Self {
        let min_queries = config.min_queries.max(1);
        Self {
            min_queries,
            max_queries: config.max_queries.max(min_queries),
        }
    }

    /// (positive, negative, boundary) queries to aim for.
    fn distribution(reason: UncertaintyReason) -> (usize, usize, usize) {
        match reason {
            UncertaintyReason::InsufficientInstances => (3, 1, 1),
            UncertaintyReason::ConflictingEvidence => (2, 2, 1),
            UncertaintyReason::LowConfidence => (2, 1, 2),
            UncertaintyReason::OvergeneralizationFlagged => (1, 2, 2),
            UncertaintyReason::EvidenceTimeout => (2, 1, 1),
        }
    }

    /// Between `min_queries` and `max_queries` queries, highest priority first.
    pub fn plan(
        &self,
        candidate: &GeneralPattern,
        reason: UncertaintyReason,
    ) -> Vec<SuggestedQuery> {
        let terms = key_terms(&candidate.solution_phrase);
        let c = &candidate.conditions;

        let mut positive = Vec::new();
        for signal in &candidate.missing_signals {
            match signal {
                MissingSignal::NoPassingTests => positive.push((
                    format!("{} tests pass", terms),
                    "fix followed by a passing test run".to_string(),
                )),
                MissingSignal::NoUserConfirmation => positive.push((
                    format!("{} fixed works", terms),
                    "user confirms the fix worked".to_string(),
                )),
                _ => {}
            }
        }
        positive.push((
            candidate.solution_phrase.clone(),
            "more sessions applying the same fix".to_string(),
        ));
        positive.push((
            format!("{} {}", c.problem_class, c.domain),
            "sessions with the same problem, to see which fix they chose".to_string(),
        ));

        let mut negative = Vec::new();
        let competing: BTreeSet<&str> = candidate
            .counterexamples
            .iter()
            .filter(|ce| ce.kind == CounterexampleKind::ShapeMismatch)
            // Shape-mismatch notes lead with the competing shape.
            .filter_map(|ce| ce.note.split_whitespace().next())
            .collect();
        for shape in competing {
            negative.push((
                format!("{} {}", c.problem_class, shape.replace('-', " ")),
                "sessions where a competing fix resolved the problem".to_string(),
            ));
        }
        negative.push((
            format!("{} still failing", terms),
            "the fix applied but the problem persisted".to_string(),
        ));
        negative.push((
            format!("{} reverted", terms),
            "the fix was rolled back".to_string(),
        ));

        let file_query = match &c.file_type {
            Some(ft) => format!("the fix on files other than .{}", ft),
            None => "whether the fix depends on file type".to_string(),
        };
        let mut boundary = vec![
            (
                c.problem_class.clone(),
                format!("the same problem outside {} work", c.domain),
            ),
            (format!("{} {}", terms, c.domain), file_query),
        ];
        let shape_query = (
            c.solution_shape.clone(),
            "same fix shape used for unrelated problems".to_string(),
        );
        if candidate.missing_signals.contains(&MissingSignal::LowCoherence) {
            boundary.insert(0, shape_query);
        } else {
            boundary.push(shape_query);
        }

        let (want_pos, want_neg, want_bnd) = Self::distribution(reason);
        let mut picked: Vec<(QueryKind, String, String)> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut take =
            |kind: QueryKind, pool: &[(String, String)], want: usize, picked: &mut Vec<_>| {
                let mut taken = 0;
                for (query, purpose) in pool {
                    if taken == want {
                        break;
                    }
                    if seen.insert(query.clone()) {
                        picked.push((kind, query.clone(), purpose.clone()));
                        taken += 1;
                    }
                }
            };
        take(QueryKind::Positive, &positive, want_pos, &mut picked);
        take(QueryKind::Negative, &negative, want_neg, &mut picked);
        take(QueryKind::Boundary, &boundary, want_bnd, &mut picked);

        // Top up from whatever is left, boundary queries last.
        if picked.len() < self.min_queries {
            let short = self.min_queries - picked.len();
            let mut extra = Vec::new();
            take(QueryKind::Positive, &positive, short, &mut extra);
            take(QueryKind::Negative, &negative, short, &mut extra);
            take(QueryKind::Boundary, &boundary, short, &mut extra);
            picked.extend(extra.into_iter().take(short));
        }
        picked.truncate(self.max_queries);

        let total = picked.len() as u32;
        picked
            .into_iter()
            .enumerate()
            .map(|(i, (kind, query, purpose))| SuggestedQuery {
                id: hash_parts(&[candidate.id.as_str(), query.as_str()])[..12].to_string(),
                kind,
                query,
                purpose,
                priority: total - i as u32,
                executed: false,
            })
            .collect()
    }
}

fn key_terms(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .filter(|w| !is_function_word(w))
        .skip(1)
        .take(KEY_TERMS)
        .collect::<Vec<_>>()
        .join(" ")
}
