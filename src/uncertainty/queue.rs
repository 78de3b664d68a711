use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queries::QueryPlanner;
use super::types::{
    ApplyOutcome, DecisionBoundary, EvidenceUpdate, QueueStats, Resolution, ResolutionAttempt,
    UncertaintyCounts, UncertaintyItem, UncertaintyReason, UncertaintyStatus,
};
use crate::config::{UncertaintyConfig, ValidationConfig};
use crate::error::{MinerError, Result};
use crate::utils::write_atomic;
use crate::validation::{ApplicabilityConditions, GeneralPattern};

const QUEUE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    #[serde(default)]
    version: u32,
    items: Vec<UncertaintyItem>,
    #[serde(default)]
    stats: QueueStats,
}

/// Durable queue of deferred candidates.
///
/// Reads go through the `RwLock`; every mutation holds the async write gate
/// across mutate + persist, so the file only ever sees whole transitions.
/// A failed persist rolls the in-memory state back.
pub struct UncertaintyQueue {
    config: UncertaintyConfig,
    validation: ValidationConfig,
    planner: QueryPlanner,
    path: Option<PathBuf>,
    state: RwLock<QueueState>,
    write_gate: Mutex<()>,
}

impl UncertaintyQueue {
    /// Queue without a backing file.
    pub fn in_memory(config: UncertaintyConfig, validation: ValidationConfig) -> Self {
        Self {
            planner: QueryPlanner::new(&config),
            config,
            validation,
            path: None,
            state: RwLock::new(QueueState {
                version: QUEUE_FORMAT_VERSION,
                ..Default::default()
            }),
            write_gate: Mutex::new(()),
        }
    }

    /// Open the queue file, creating an empty queue when it does not exist.
    pub async fn open(
        path: impl Into<PathBuf>,
        config: UncertaintyConfig,
        validation: ValidationConfig,
    ) -> Result<Self> {
        let path = path.into();
        let mut queue = Self::in_memory(config, validation);

        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let state: QueueState = serde_json::from_str(&content)?;
            if state.version > QUEUE_FORMAT_VERSION {
                warn!(
                    version = state.version,
                    supported = QUEUE_FORMAT_VERSION,
                    "Queue file written by a newer version"
                );
            }
            debug!(items = state.items.len(), path = %path.display(), "Loaded uncertainty queue");
            *queue.state.get_mut() = state;
        }

        queue.path = Some(path);
        Ok(queue)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, state: &QueueState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(path, &json).await
    }

    /// Apply `mutate` under the write gate and persist, or leave the queue untouched.
    async fn commit<T>(&self, mutate: impl FnOnce(&mut QueueState) -> Result<T>) -> Result<T> {
        let _gate = self.write_gate.lock().await;

        let (previous, snapshot, value) = {
            let mut state = self.state.write();
            let previous = state.clone();
            let value = mutate(&mut *state)?;
            state.version = QUEUE_FORMAT_VERSION;
            (previous, state.clone(), value)
        };

        if let Err(e) = self.persist(&snapshot).await {
            *self.state.write() = previous;
            return Err(e);
        }
        Ok(value)
    }

    /// Queue a deferred candidate. An open item for the same candidate id
    /// is returned unchanged.
    pub async fn enqueue(
        &self,
        candidate: GeneralPattern,
        reason: UncertaintyReason,
    ) -> Result<String> {
        let now = Utc::now();
        let boundary = DecisionBoundary::for_candidate(&candidate, &self.config, &self.validation);
        let queries = self.planner.plan(&candidate, reason);
        let max_size = self.config.max_queue_size.max(1);

        self.commit(move |state| {
            if let Some(existing) = state
                .items
                .iter()
                .find(|i| i.is_open() && i.candidate.id == candidate.id)
            {
                return Ok(existing.id.clone());
            }

            let pending = state.items.iter().filter(|i| i.is_pending()).count();
            if pending >= max_size
                && let Some(oldest) = state
                    .items
                    .iter_mut()
                    .filter(|i| i.is_pending())
                    .min_by_key(|i| i.created_at)
            {
                oldest.status = UncertaintyStatus::Discarded;
                oldest.progress_note = "evicted: queue at capacity".to_string();
                oldest.updated_at = now;
                state.stats.total_evicted += 1;
                warn!(item_id = %oldest.id, "Uncertainty queue full, evicted oldest pending item");
            }

            let id = Uuid::new_v4().to_string();
            let progress_note = initial_note(&boundary, &candidate);
            info!(
                item_id = %id,
                candidate_id = %candidate.id,
                reason = %reason,
                queries = queries.len(),
                "Candidate queued for more evidence"
            );
            state.items.push(UncertaintyItem {
                id: id.clone(),
                confidence: candidate.confidence(),
                positive_instances: candidate.instance_count,
                counted_transcripts: candidate.transcripts.iter().cloned().collect(),
                candidate,
                reason,
                boundary,
                queries,
                status: UncertaintyStatus::Pending,
                attempts: Vec::new(),
                progress_note,
                created_at: now,
                updated_at: now,
            });
            state.stats.total_queued += 1;
            Ok(id)
        })
        .await
    }

    /// Check new evidence against the item's decision boundary.
    ///
    /// Repeating an update key, or applying evidence to an item that is no
    /// longer pending, changes nothing. Sources the item already counted add
    /// no instances. An item deferred for a reason that needs re-validation
    /// only promotes on an update that carries a clean verdict.
    pub async fn apply_evidence(
        &self,
        item_id: &str,
        update: EvidenceUpdate,
    ) -> Result<ApplyOutcome> {
        let now = Utc::now();
        let strong_floor = self.config.strong_counterexample_confidence;
        let discard_policy = self.config.discard_on_counterexample;
        let max_attempts = self.config.max_attempts.max(1);
        let validation = self.validation.clone();
        let uncertainty = self.config.clone();

        self.commit(move |state| {
            let item = state
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| MinerError::UncertaintyNotFound(item_id.to_string()))?;

            if !item.is_pending() || item.has_attempt(&update.key) {
                return Ok(ApplyOutcome {
                    status: item.status,
                    progress_note: item.progress_note.clone(),
                    changed: false,
                });
            }

            let strong = update
                .counterexamples
                .iter()
                .filter(|c| c.confidence >= strong_floor)
                .count();

            let mut added = update.positives;
            for source in &update.sources {
                if item.counted_transcripts.insert(source.clone()) {
                    added += 1;
                }
            }
            item.positive_instances += added;

            if let Some(confidence) = update.confidence {
                item.confidence = confidence;
            }
            if let Some(candidate) = update.candidate {
                item.confidence = update.confidence.unwrap_or(candidate.confidence());
                item.candidate = candidate;
            }
            item.candidate
                .counterexamples
                .extend(update.counterexamples.iter().cloned());

            if let Some(reason) = update.reason
                && (update.cleared || !item.reason.needs_revalidation())
            {
                item.reason = reason;
            }
            for query in item.queries.iter_mut() {
                if update.queries_run.contains(&query.id) {
                    query.executed = true;
                }
            }

            let instances_needed = validation
                .min_instances
                .saturating_sub(item.positive_instances);
            item.boundary = DecisionBoundary {
                instances_needed,
                ..DecisionBoundary::for_candidate(&item.candidate, &uncertainty, &validation)
            };

            let gated = item.reason.needs_revalidation() && !update.cleared;
            let attempts = item.attempts.len() + 1;
            let queries_exhausted =
                !item.queries.is_empty() && item.queries.iter().all(|q| q.executed);

            let (status, note) = if discard_policy && strong > 0 {
                (
                    UncertaintyStatus::ResolvedDiscard,
                    format!("discarded: {} strong counterexample(s) arrived", strong),
                )
            } else if !gated
                && instances_needed == 0
                && item.confidence >= item.boundary.target_confidence
            {
                (
                    UncertaintyStatus::ResolvedPromote,
                    format!(
                        "promotable: {} instances at confidence {:.2}",
                        item.positive_instances, item.confidence
                    ),
                )
            } else if attempts >= max_attempts || queries_exhausted {
                (
                    UncertaintyStatus::Escalated,
                    format!(
                        "escalated after {} attempt(s): {}",
                        attempts,
                        progress_note(
                            instances_needed,
                            item.confidence,
                            item.boundary.target_confidence
                        )
                    ),
                )
            } else if gated {
                (
                    UncertaintyStatus::Pending,
                    format!(
                        "awaiting clean re-validation ({}); {}",
                        item.reason,
                        progress_note(
                            instances_needed,
                            item.confidence,
                            item.boundary.target_confidence
                        )
                    ),
                )
            } else {
                (
                    UncertaintyStatus::Pending,
                    progress_note(
                        instances_needed,
                        item.confidence,
                        item.boundary.target_confidence,
                    ),
                )
            };

            item.attempts.push(ResolutionAttempt {
                key: update.key,
                at: now,
                positives_added: added,
                counterexamples_added: update.counterexamples.len(),
                new_confidence: item.confidence,
                note: note.clone(),
            });
            item.status = status;
            item.progress_note = note.clone();
            item.updated_at = now;

            state.stats.evidence_applied += 1;
            match status {
                UncertaintyStatus::ResolvedPromote => state.stats.total_promoted += 1,
                UncertaintyStatus::ResolvedDiscard => state.stats.total_discarded += 1,
                UncertaintyStatus::Escalated => {
                    state.stats.total_escalated += 1;
                    warn!(item_id = %item_id, attempts, "Uncertainty item escalated for review");
                }
                _ => {}
            }
            debug!(item_id = %item_id, status = %status, added, "Evidence applied");

            Ok(ApplyOutcome {
                status,
                progress_note: note,
                changed: true,
            })
        })
        .await
    }

    /// Hand a pending item to a reviewer. Escalating an escalated item is a
    /// no-op; a decided item cannot be escalated.
    pub async fn escalate(&self, item_id: &str, reason: &str) -> Result<ApplyOutcome> {
        let now = Utc::now();

        self.commit(move |state| {
            let item = state
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| MinerError::UncertaintyNotFound(item_id.to_string()))?;

            match item.status {
                UncertaintyStatus::Escalated => {
                    return Ok(ApplyOutcome {
                        status: item.status,
                        progress_note: item.progress_note.clone(),
                        changed: false,
                    });
                }
                UncertaintyStatus::Pending => {}
                other => {
                    return Err(MinerError::InvalidTransition {
                        from: other.to_string(),
                        to: UncertaintyStatus::Escalated.to_string(),
                    });
                }
            }

            item.status = UncertaintyStatus::Escalated;
            item.progress_note = format!("escalated: {}", reason);
            item.updated_at = now;
            state.stats.total_escalated += 1;
            info!(item_id = %item_id, reason, "Uncertainty item escalated");

            Ok(ApplyOutcome {
                status: item.status,
                progress_note: item.progress_note.clone(),
                changed: true,
            })
        })
        .await
    }

    /// Decide an item outright, pending or escalated. Resolving to the status
    /// it already has is a no-op; any other move out of a terminal status is
    /// rejected.
    pub async fn resolve(&self, item_id: &str, resolution: Resolution) -> Result<ApplyOutcome> {
        let now = Utc::now();
        let target = resolution.status();

        self.commit(move |state| {
            let item = state
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| MinerError::UncertaintyNotFound(item_id.to_string()))?;

            if item.status == target {
                return Ok(ApplyOutcome {
                    status: item.status,
                    progress_note: item.progress_note.clone(),
                    changed: false,
                });
            }
            if item.status.is_terminal() {
                return Err(MinerError::InvalidTransition {
                    from: item.status.to_string(),
                    to: target.to_string(),
                });
            }

            item.status = target;
            item.progress_note = format!("resolved: {}", target);
            item.updated_at = now;
            match target {
                UncertaintyStatus::ResolvedPromote => state.stats.total_promoted += 1,
                _ => state.stats.total_discarded += 1,
            }
            info!(item_id = %item_id, status = %target, "Uncertainty item resolved");

            Ok(ApplyOutcome {
                status: target,
                progress_note: item.progress_note.clone(),
                changed: true,
            })
        })
        .await
    }

    /// Discard pending items older than `expiry_days` as of `now`.
    /// Returns the ids that expired.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = now - Duration::days(self.config.expiry_days);
        let expired = self.commit(move |state| {
            let mut expired = Vec::new();
            for item in state
                .items
                .iter_mut()
                .filter(|i| i.is_pending() && i.created_at < cutoff)
            {
                item.status = UncertaintyStatus::Discarded;
                item.progress_note = "expired without resolution".to_string();
                item.updated_at = now;
                expired.push(item.id.clone());
            }
            state.stats.total_expired += expired.len() as u64;
            Ok(expired)
        })
        .await?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired uncertainty items");
        }
        Ok(expired)
    }

    pub fn get(&self, item_id: &str) -> Option<UncertaintyItem> {
        self.state.read().items.iter().find(|i| i.id == item_id).cloned()
    }

    /// Items in insertion order, optionally filtered by status.
    pub fn list(&self, status: Option<UncertaintyStatus>) -> Vec<UncertaintyItem> {
        self.state
            .read()
            .items
            .iter()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> Vec<UncertaintyItem> {
        self.list(Some(UncertaintyStatus::Pending))
    }

    /// Pending or escalated item under the same applicability conditions.
    pub fn find_open(&self, conditions: &ApplicabilityConditions) -> Option<UncertaintyItem> {
        self.state
            .read()
            .items
            .iter()
            .find(|i| i.is_open() && &i.candidate.conditions == conditions)
            .cloned()
    }

    pub fn counts(&self) -> UncertaintyCounts {
        let state = self.state.read();
        let mut counts = UncertaintyCounts::default();
        for item in &state.items {
            match item.status {
                UncertaintyStatus::Pending => counts.pending += 1,
                UncertaintyStatus::Escalated => counts.escalated += 1,
                UncertaintyStatus::ResolvedPromote => counts.resolved_promote += 1,
                UncertaintyStatus::ResolvedDiscard => counts.resolved_discard += 1,
                UncertaintyStatus::Discarded => counts.discarded += 1,
            }
        }
        counts
    }

    pub fn stats(&self) -> QueueStats {
        self.state.read().stats
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }
}

fn progress_note(instances_needed: usize, confidence: f32, target: f32) -> String {
    match instances_needed {
        0 => format!("confidence {:.2} of {:.2} needed", confidence, target),
        n => format!(
            "{} more instance(s) needed; confidence {:.2} of {:.2}",
            n, confidence, target
        ),
    }
}

fn initial_note(boundary: &DecisionBoundary, candidate: &GeneralPattern) -> String {
    let mut note = progress_note(
        boundary.instances_needed,
        candidate.confidence(),
        boundary.target_confidence,
    );
    if boundary.counterexample_would_discard {
        note.push_str("; a strong counterexample discards it");
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{FragmentRange, FragmentRef};
    use crate::features::Domain;
    use crate::redaction::TaintSet;
    use crate::validation::{ConfidenceScores, Counterexample, CounterexampleKind};
    use tempfile::TempDir;

    fn candidate(id: &str, confidence: f32, instances: usize) -> GeneralPattern {
        GeneralPattern {
            id: id.into(),
            principle: "When missing-dependency comes up, pin it".into(),
            signature: "dependency/missing-dependency/pin-dependency".into(),
            conditions: ApplicabilityConditions {
                domain: Domain::Dependency,
                problem_class: "missing-dependency".into(),
                solution_shape: "pin-dependency".into(),
                file_type: None,
            },
            solution_phrase: "pinned lodash 4.17.20 package.json".into(),
            scores: ConfidenceScores {
                confidence,
                ..Default::default()
            },
            counterexamples: Vec::new(),
            instance_count: instances,
            transcripts: (1..=instances).map(|i| format!("t{}", i)).collect(),
            members: vec!["m1".into()],
            supporting: vec!["m1".into()],
            taint: TaintSet::new(),
            missing_signals: Vec::new(),
            critique_notes: Vec::new(),
        }
    }

    fn strong_counterexample() -> Counterexample {
        Counterexample {
            pattern_id: "m9".into(),
            fragment: FragmentRef {
                transcript_id: "t9".into(),
                range: FragmentRange::message(1, 20),
            },
            kind: CounterexampleKind::OutcomeFailure,
            confidence: 0.9,
            note: "the fix did not hold".into(),
        }
    }

    fn queue() -> UncertaintyQueue {
        UncertaintyQueue::in_memory(UncertaintyConfig::default(), ValidationConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_builds_boundary_and_queries() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.6, 2), UncertaintyReason::InsufficientInstances)
            .await
            .unwrap();
        let item = q.get(&id).unwrap();
        assert_eq!(item.status, UncertaintyStatus::Pending);
        assert_eq!(item.boundary.instances_needed, 1);
        assert!(!item.boundary.counterexample_would_discard);
        assert!((3..=7).contains(&item.queries.len()));
        assert_eq!(q.counts().pending, 1);
    }

    #[tokio::test]
    async fn test_enqueue_same_candidate_is_idempotent() {
        let q = queue();
        let a = q
            .enqueue(candidate("c1", 0.6, 2), UncertaintyReason::LowConfidence)
            .await
            .unwrap();
        let b = q
            .enqueue(candidate("c1", 0.6, 2), UncertaintyReason::LowConfidence)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_positive_evidence_promotes() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.7, 2), UncertaintyReason::InsufficientInstances)
            .await
            .unwrap();

        let outcome = q
            .apply_evidence(
                &id,
                EvidenceUpdate::new("run-1")
                    .with_positives(1)
                    .with_confidence(0.8),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, UncertaintyStatus::ResolvedPromote);
        assert!(outcome.changed);
        assert_eq!(q.get(&id).unwrap().attempts.len(), 1);
        assert_eq!(q.stats().total_promoted, 1);
    }

    #[tokio::test]
    async fn test_insufficient_evidence_stays_pending_with_note() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::InsufficientInstances)
            .await
            .unwrap();
        let outcome = q
            .apply_evidence(&id, EvidenceUpdate::new("run-1").with_positives(1))
            .await
            .unwrap();
        assert_eq!(outcome.status, UncertaintyStatus::Pending);
        assert!(outcome.progress_note.contains("1 more instance"));
    }

    #[tokio::test]
    async fn test_strong_counterexample_discards() {
        let q = queue();
        let mut c = candidate("c1", 0.58, 2);
        c.counterexamples.push(strong_counterexample());
        let id = q.enqueue(c, UncertaintyReason::ConflictingEvidence).await.unwrap();
        assert!(q.get(&id).unwrap().boundary.counterexample_would_discard);

        let outcome = q
            .apply_evidence(
                &id,
                EvidenceUpdate::new("run-2").with_counterexamples(vec![strong_counterexample()]),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, UncertaintyStatus::ResolvedDiscard);
    }

    #[tokio::test]
    async fn test_repeated_update_key_is_noop() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::InsufficientInstances)
            .await
            .unwrap();
        let update = EvidenceUpdate::new("run-1").with_positives(1);
        q.apply_evidence(&id, update.clone()).await.unwrap();
        let again = q.apply_evidence(&id, update).await.unwrap();

        assert!(!again.changed);
        let item = q.get(&id).unwrap();
        assert_eq!(item.positive_instances, 2);
        assert_eq!(item.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_and_rejects_flip() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();

        let first = q.resolve(&id, Resolution::Discard).await.unwrap();
        assert!(first.changed);
        let second = q.resolve(&id, Resolution::Discard).await.unwrap();
        assert!(!second.changed);
        assert_eq!(q.stats().total_discarded, 1);

        let err = q.resolve(&id, Resolution::Promote).await.unwrap_err();
        assert!(matches!(err, MinerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_item() {
        let err = queue().resolve("missing", Resolution::Promote).await.unwrap_err();
        assert!(matches!(err, MinerError::UncertaintyNotFound(_)));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();

        assert!(q.prune_expired(Utc::now()).await.unwrap().is_empty());
        let expired = q
            .prune_expired(Utc::now() + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(q.get(&id).unwrap().status, UncertaintyStatus::Discarded);
        assert_eq!(q.stats().total_expired, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_pending() {
        let config = UncertaintyConfig {
            max_queue_size: 2,
            ..Default::default()
        };
        let q = UncertaintyQueue::in_memory(config, ValidationConfig::default());
        let first = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();
        q.enqueue(candidate("c2", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();
        q.enqueue(candidate("c3", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();

        assert_eq!(q.get(&first).unwrap().status, UncertaintyStatus::Discarded);
        assert_eq!(q.counts().pending, 2);
        assert_eq!(q.stats().total_evicted, 1);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let id = {
            let q = UncertaintyQueue::open(
                &path,
                UncertaintyConfig::default(),
                ValidationConfig::default(),
            )
            .await
            .unwrap();
            let id = q
                .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::LowConfidence)
                .await
                .unwrap();
            q.apply_evidence(&id, EvidenceUpdate::new("run-1").with_positives(1))
                .await
                .unwrap();
            id
        };

        let reopened = UncertaintyQueue::open(
            &path,
            UncertaintyConfig::default(),
            ValidationConfig::default(),
        )
        .await
        .unwrap();
        let item = reopened.get(&id).unwrap();
        assert_eq!(item.positive_instances, 2);
        assert_eq!(item.attempts.len(), 1);
        assert_eq!(reopened.stats().total_queued, 1);
    }

    #[tokio::test]
    async fn test_find_open_by_conditions() {
        let q = queue();
        let c = candidate("c1", 0.5, 1);
        let conditions = c.conditions.clone();
        let id = q.enqueue(c, UncertaintyReason::LowConfidence).await.unwrap();
        assert!(q.find_open(&conditions).is_some());

        let mut other = conditions.clone();
        other.domain = Domain::Build;
        assert!(q.find_open(&other).is_none());

        q.escalate(&id, "needs a human").await.unwrap();
        assert_eq!(q.find_open(&conditions).unwrap().id, id);

        q.resolve(&id, Resolution::Discard).await.unwrap();
        assert!(q.find_open(&conditions).is_none());
    }

    #[tokio::test]
    async fn test_repeated_source_is_counted_once() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 2), UncertaintyReason::InsufficientInstances)
            .await
            .unwrap();

        let outcome = q
            .apply_evidence(
                &id,
                EvidenceUpdate::new("run-1").with_sources(vec!["t1".into(), "t2".into()]),
            )
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(q.get(&id).unwrap().positive_instances, 2);

        q.apply_evidence(
            &id,
            EvidenceUpdate::new("run-2").with_sources(vec!["t2".into(), "t3".into()]),
        )
        .await
        .unwrap();
        let item = q.get(&id).unwrap();
        assert_eq!(item.positive_instances, 3);
        assert_eq!(item.counted_transcripts.len(), 3);
    }

    #[tokio::test]
    async fn test_flagged_item_waits_for_clean_verdict() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.9, 3), UncertaintyReason::OvergeneralizationFlagged)
            .await
            .unwrap();

        let held = q
            .apply_evidence(
                &id,
                EvidenceUpdate::new("run-1")
                    .with_sources(vec!["t4".into()])
                    .with_reason(UncertaintyReason::InsufficientInstances),
            )
            .await
            .unwrap();
        assert_eq!(held.status, UncertaintyStatus::Pending);
        assert!(held.progress_note.contains("re-validation"));
        let item = q.get(&id).unwrap();
        assert_eq!(item.reason, UncertaintyReason::OvergeneralizationFlagged);
        assert_eq!(item.positive_instances, 4);

        let cleared = q
            .apply_evidence(
                &id,
                EvidenceUpdate::new("run-2")
                    .with_sources(vec!["t5".into()])
                    .with_clean_verdict(),
            )
            .await
            .unwrap();
        assert_eq!(cleared.status, UncertaintyStatus::ResolvedPromote);
    }

    #[tokio::test]
    async fn test_escalates_after_max_attempts() {
        let config = UncertaintyConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let q = UncertaintyQueue::in_memory(config, ValidationConfig::default());
        let id = q
            .enqueue(candidate("c1", 0.3, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();

        let first = q
            .apply_evidence(&id, EvidenceUpdate::new("run-1").with_sources(vec!["t2".into()]))
            .await
            .unwrap();
        assert_eq!(first.status, UncertaintyStatus::Pending);

        let second = q
            .apply_evidence(&id, EvidenceUpdate::new("run-2").with_sources(vec!["t3".into()]))
            .await
            .unwrap();
        assert_eq!(second.status, UncertaintyStatus::Escalated);
        assert!(second.progress_note.starts_with("escalated after 2 attempt(s)"));
        assert_eq!(q.counts().escalated, 1);
        assert_eq!(q.stats().total_escalated, 1);

        let ignored = q
            .apply_evidence(&id, EvidenceUpdate::new("run-3").with_sources(vec!["t4".into()]))
            .await
            .unwrap();
        assert!(!ignored.changed);
        assert_eq!(q.get(&id).unwrap().positive_instances, 3);
    }

    #[tokio::test]
    async fn test_escalates_once_every_query_ran() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.3, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();
        let item = q.get(&id).unwrap();
        assert!(item.can_auto_resolve(5));
        let ids: Vec<String> = item.queries.iter().map(|query| query.id.clone()).collect();

        let outcome = q
            .apply_evidence(&id, EvidenceUpdate::new("run-1").with_queries_run(ids))
            .await
            .unwrap();
        assert_eq!(outcome.status, UncertaintyStatus::Escalated);

        let item = q.get(&id).unwrap();
        assert!(item.queries.iter().all(|query| query.executed));
        assert!(!item.can_auto_resolve(5));
    }

    #[tokio::test]
    async fn test_escalate_then_resolve() {
        let q = queue();
        let id = q
            .enqueue(candidate("c1", 0.5, 1), UncertaintyReason::LowConfidence)
            .await
            .unwrap();

        assert!(q.escalate(&id, "ambiguous boundary").await.unwrap().changed);
        let again = q.escalate(&id, "ambiguous boundary").await.unwrap();
        assert!(!again.changed);
        assert_eq!(q.get(&id).unwrap().status, UncertaintyStatus::Escalated);
        assert_eq!(q.stats().total_escalated, 1);

        let resolved = q.resolve(&id, Resolution::Promote).await.unwrap();
        assert_eq!(resolved.status, UncertaintyStatus::ResolvedPromote);

        let err = q.escalate(&id, "too late").await.unwrap_err();
        assert!(matches!(err, MinerError::InvalidTransition { .. }));
    }
}
