use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::checkpoint::{CheckpointManager, RunCheckpoint, RunCounts, RunPhase};
use super::signal::CancelSignal;
use crate::cluster::{Clusterer, Clustering, InstanceCluster};
use crate::config::{MinerConfig, MinerPaths};
use crate::dedup::{DedupAction, Deduplicator};
use crate::error::{MinerError, Result, StoreFailure};
use crate::evidence::{EvidenceStore, FragmentRef, Transcript};
use crate::features::{FeatureExtractor, PatternArena, QualityScorer};
use crate::knowledge::{KnowledgeBase, SkillRule, SqliteKnowledgeBase};
use crate::provenance::ProvenanceGraph;
use crate::redaction::{AuditLog, Redactor, SafetyPredicate, TaintPolicy};
use crate::uncertainty::{
    EvidenceUpdate, Resolution, UncertaintyQueue, UncertaintyReason, UncertaintyStatus,
};
use crate::utils::{hash_parts, truncate_chars};
use crate::validation::{GeneralPattern, GeneralizationValidator, SimilarityModel, Verdict};

/// Outcome of a mining run. Counts are filled in even when the run aborts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub counts: RunCounts,
    /// Last phase that finished and was checkpointed.
    pub completed_phase: Option<RunPhase>,
    /// Rules written to the knowledge base by this run.
    pub promoted_rules: Vec<String>,
    /// Queue items created or updated by this run.
    pub queue_delta: Vec<String>,
    pub cancelled: bool,
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.completed_phase == Some(RunPhase::Dedup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Promotable,
    Unsafe,
    NoEvidence,
    NoProvenance,
}

/// Working set owned by one run.
struct RunState {
    run_id: String,
    arena: PatternArena,
    graph: ProvenanceGraph,
    clustering: Clustering,
    promotable: Vec<GeneralPattern>,
    counts: RunCounts,
    completed: Option<RunPhase>,
    promoted_rules: Vec<String>,
    queue_delta: Vec<String>,
}

impl RunState {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            arena: PatternArena::new(),
            graph: ProvenanceGraph::new(),
            clustering: Clustering::default(),
            promotable: Vec::new(),
            counts: RunCounts::default(),
            completed: None,
            promoted_rules: Vec::new(),
            queue_delta: Vec::new(),
        }
    }

    fn restore(checkpoint: &RunCheckpoint) -> Result<Self> {
        let mut run = Self::new(checkpoint.run_id.clone());
        run.counts = checkpoint.counts;
        run.completed = Some(checkpoint.phase);
        run.promoted_rules = checkpoint.promoted_rules.clone();
        run.queue_delta = checkpoint.queue_delta.clone();

        if checkpoint.phase < RunPhase::Dedup {
            run.arena = checkpoint.try_restore_arena()?;
            run.graph = checkpoint.try_restore_graph()?;
        }
        match checkpoint.phase {
            RunPhase::Clustering => run.clustering = checkpoint.try_restore_clustering()?,
            RunPhase::Validation => run.promotable = checkpoint.try_restore_candidates()?,
            _ => {}
        }
        Ok(run)
    }

    fn touch_item(&mut self, item_id: String) {
        if !self.queue_delta.contains(&item_id) {
            self.queue_delta.push(item_id);
        }
    }

    fn keep_promotable(&mut self, candidate: GeneralPattern) {
        if !self.promotable.iter().any(|c| c.id == candidate.id) {
            self.promotable.push(candidate);
        }
    }

    fn record_rule(&mut self, rule_id: &str) {
        if !self.promoted_rules.iter().any(|r| r == rule_id) {
            self.promoted_rules.push(rule_id.to_string());
        }
    }

    fn into_report(self, result: Result<()>) -> RunReport {
        let (cancelled, aborted) = match result {
            Ok(()) => (false, None),
            Err(e) => (matches!(e, MinerError::Cancelled { .. }), Some(e.to_string())),
        };
        RunReport {
            run_id: self.run_id,
            counts: self.counts,
            completed_phase: self.completed,
            promoted_rules: self.promoted_rules,
            queue_delta: self.queue_delta,
            cancelled,
            aborted,
        }
    }
}

/// Runs discovery → clustering → validation → dedup over the evidence store.
///
/// A run reads the store, owns its own working set, and writes only through
/// the knowledge base and the uncertainty queue. Each write is committed
/// whole, so a cancelled or aborted run leaves both consistent.
pub struct MiningPipeline {
    config: MinerConfig,
    store: Arc<dyn EvidenceStore>,
    knowledge: Arc<dyn KnowledgeBase>,
    queue: Arc<UncertaintyQueue>,
    redactor: Redactor,
    policy: TaintPolicy,
    quality: QualityScorer,
    extractor: FeatureExtractor,
    clusterer: Clusterer,
    validator: GeneralizationValidator,
    deduplicator: Deduplicator,
    checkpoints: Option<CheckpointManager>,
    audit: Option<AuditLog>,
    cancel: CancelSignal,
}

impl MiningPipeline {
    pub fn new(
        config: MinerConfig,
        store: Arc<dyn EvidenceStore>,
        knowledge: Arc<dyn KnowledgeBase>,
        queue: Arc<UncertaintyQueue>,
    ) -> Self {
        Self {
            redactor: Redactor::new(config.redaction.clone()),
            policy: TaintPolicy::new(config.taint.clone()),
            quality: QualityScorer::new(config.quality.clone()),
            extractor: FeatureExtractor::new(config.extraction.clone()),
            clusterer: Clusterer::new(config.clustering.clone()),
            validator: GeneralizationValidator::new(
                config.validation.clone(),
                config.taint.clone(),
            ),
            deduplicator: Deduplicator::new(config.dedup.clone()),
            checkpoints: None,
            audit: None,
            cancel: CancelSignal::new(),
            config,
            store,
            knowledge,
            queue,
        }
    }

    /// Pipeline over the on-disk layout: SQLite knowledge base, queue file,
    /// redaction audit log and checkpoint directory under `paths.root`.
    pub async fn open(
        paths: &MinerPaths,
        config: MinerConfig,
        store: Arc<dyn EvidenceStore>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&paths.root).await?;

        let knowledge = Arc::new(SqliteKnowledgeBase::open(&paths.knowledge_db)?);
        let queue = Arc::new(
            UncertaintyQueue::open(
                &paths.queue_file,
                config.uncertainty.clone(),
                config.validation.clone(),
            )
            .await?,
        );

        info!(root = %paths.root.display(), "Opened miner workspace");
        Ok(Self::new(config, store, knowledge, queue)
            .with_checkpoints(CheckpointManager::new(&paths.checkpoints_dir))
            .with_audit_log(AuditLog::new(&paths.audit_log)))
    }

    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replace the validator, e.g. to inject a describer or critique.
    pub fn with_validator(mut self, validator: GeneralizationValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Semantic similarity used by both validation and dedup.
    pub fn with_similarity(mut self, similarity: Arc<dyn SimilarityModel>) -> Self {
        self.validator = self.validator.with_similarity(Arc::clone(&similarity));
        self.deduplicator = self.deduplicator.with_similarity(similarity);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn knowledge(&self) -> Arc<dyn KnowledgeBase> {
        Arc::clone(&self.knowledge)
    }

    pub fn queue(&self) -> Arc<UncertaintyQueue> {
        Arc::clone(&self.queue)
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Mine every fragment matching `query` (`*` for all).
    pub async fn run(&self, query: &str) -> RunReport {
        let mut run = RunState::new(Uuid::new_v4().to_string());
        info!(run_id = %run.run_id, query, "Mining run started");
        let result = self.execute(query, &mut run, RunPhase::Discovery).await;
        self.finish(run, result)
    }

    /// Continue a run from its latest checkpoint.
    pub async fn resume(&self, run_id: &str) -> Result<RunReport> {
        let manager = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| MinerError::Checkpoint("No checkpoint directory configured".into()))?;
        let checkpoint = manager
            .latest(run_id)
            .await?
            .ok_or_else(|| MinerError::Checkpoint(format!("No checkpoint for run {}", run_id)))?;

        let mut run = RunState::restore(&checkpoint)?;
        info!(run_id, phase = %checkpoint.phase, "Resuming mining run");

        let result = match checkpoint.phase.next() {
            Some(next) => self.execute("", &mut run, next).await,
            None => Ok(()),
        };
        Ok(self.finish(run, result))
    }

    fn finish(&self, run: RunState, result: Result<()>) -> RunReport {
        match &result {
            Ok(()) => info!(run_id = %run.run_id, counts = ?run.counts, "Mining run complete"),
            Err(MinerError::Cancelled { phase }) => {
                warn!(
                    run_id = %run.run_id,
                    phase = %phase,
                    counts = ?run.counts,
                    "Mining run cancelled"
                )
            }
            Err(e) => {
                error!(
                    run_id = %run.run_id,
                    error = %e,
                    counts = ?run.counts,
                    "Mining run aborted"
                )
            }
        }
        run.into_report(result)
    }

    async fn execute(&self, query: &str, run: &mut RunState, from: RunPhase) -> Result<()> {
        for phase in RunPhase::ALL.into_iter().filter(|p| *p >= from) {
            match phase {
                RunPhase::Discovery => self.discover(query, run).await?,
                RunPhase::Clustering => self.cluster(run)?,
                RunPhase::Validation => self.validate(run).await?,
                RunPhase::Dedup => self.persist(run).await?,
            }
            run.completed = Some(phase);
            self.save_checkpoint(run, phase).await?;
            debug!(run_id = %run.run_id, phase = %phase, "Phase complete");

            if phase.next().is_some() {
                self.cancel.phase_boundary(phase.as_str())?;
            }
        }
        Ok(())
    }

    async fn save_checkpoint(&self, run: &RunState, phase: RunPhase) -> Result<()> {
        let Some(manager) = &self.checkpoints else {
            return Ok(());
        };
        if !self.config.pipeline.checkpoint_enabled {
            return Ok(());
        }

        let mut checkpoint = RunCheckpoint::new(&run.run_id, phase, run.counts)
            .with_queue_delta(&run.queue_delta)
            .with_promoted_rules(&run.promoted_rules);
        if phase < RunPhase::Dedup {
            checkpoint = checkpoint
                .with_arena_snapshot(&run.arena)?
                .with_graph_snapshot(&run.graph)?;
        }
        checkpoint = match phase {
            RunPhase::Clustering => checkpoint.with_clustering_snapshot(&run.clustering)?,
            RunPhase::Validation => checkpoint.with_candidates_snapshot(&run.promotable)?,
            _ => checkpoint,
        };
        manager.save(&checkpoint).await
    }

    /// Call the store with a timeout, retrying transient failures with backoff.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreFailure>>,
    {
        let pipeline = &self.config.pipeline;
        let limit = Duration::from_millis(pipeline.fetch_timeout_ms);
        let mut attempt = 0u32;

        loop {
            let failure = match timeout(limit, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(failure)) => failure,
                Err(_) => StoreFailure::Timeout {
                    operation: operation.to_string(),
                    duration_ms: pipeline.fetch_timeout_ms,
                },
            };
            attempt += 1;

            if failure.is_permanent() {
                return Err(MinerError::Store(failure));
            }
            if attempt > failure.max_retries(&pipeline.retry) {
                return Err(MinerError::StoreUnavailable {
                    attempts: attempt,
                    source: failure,
                });
            }

            let delay = failure.backoff(attempt, &pipeline.retry);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Evidence store call failed, retrying"
            );
            sleep(delay).await;
        }
    }

    async fn discover(&self, query: &str, run: &mut RunState) -> Result<()> {
        let store = self.store.as_ref();
        let limit = self.config.pipeline.search_limit;
        let hits = self
            .with_retry("search", move || store.search(query, limit))
            .await?;

        let transcript_ids: BTreeSet<String> = hits.into_iter().map(|f| f.source_id).collect();
        debug!(query, transcripts = transcript_ids.len(), "Search complete");

        for transcript_id in &transcript_ids {
            self.cancel.checkpoint(RunPhase::Discovery.as_str())?;

            let id = transcript_id.as_str();
            let transcript = match self.with_retry("get", move || store.get(id)).await {
                Ok(transcript) => transcript,
                Err(MinerError::Store(failure)) => {
                    warn!(transcript_id = %id, error = %failure, "Skipping transcript");
                    run.counts.skipped_transcripts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.ingest(&transcript, run).await?;
        }

        info!(
            run_id = %run.run_id,
            transcripts = run.counts.transcripts,
            low_quality = run.counts.low_quality,
            patterns = run.counts.discovered,
            malformed = run.counts.malformed,
            "Discovery complete"
        );
        Ok(())
    }

    async fn ingest(&self, transcript: &Transcript, run: &mut RunState) -> Result<()> {
        let redacted = self.redactor.redact_transcript(transcript);
        if let Some(audit) = &self.audit {
            audit.append(&redacted.report).await?;
        }
        run.counts.transcripts += 1;

        if self.quality.is_enabled() {
            let quality = self.quality.score(&redacted.fragments);
            if !quality.passed {
                debug!(
                    transcript_id = %transcript.id,
                    quality = %quality.summary(),
                    missing = ?quality.missing,
                    "Session below quality gate, not mined"
                );
                run.counts.low_quality += 1;
                return Ok(());
            }
        }

        for fragment in &redacted.fragments {
            run.graph.add_fragment(fragment);
        }

        let extraction = self.extractor.extract_transcript(&redacted.fragments);
        for e in &extraction.malformed {
            warn!(transcript_id = %transcript.id, error = %e, "Skipping malformed fragment");
        }
        run.counts.malformed += extraction.malformed.len();

        for pattern in extraction.patterns {
            run.graph.add_pattern(&pattern)?;
            run.arena.insert(pattern);
            run.counts.discovered += 1;
        }
        Ok(())
    }

    fn cluster(&self, run: &mut RunState) -> Result<()> {
        run.clustering = self.clusterer.cluster(&run.arena, &self.cancel)?;
        run.counts.clusters = run.clustering.clusters.len() + run.clustering.undersized.len();
        info!(
            run_id = %run.run_id,
            clusters = run.clustering.clusters.len(),
            undersized = run.clustering.undersized.len(),
            "Clustering complete"
        );
        Ok(())
    }

    async fn validate(&self, run: &mut RunState) -> Result<()> {
        let clusters: Vec<InstanceCluster> = run
            .clustering
            .clusters
            .iter()
            .chain(run.clustering.undersized.iter())
            .cloned()
            .collect();
        let limit = Duration::from_millis(self.config.pipeline.similarity_timeout_ms);

        for cluster in &clusters {
            self.cancel.checkpoint(RunPhase::Validation.as_str())?;

            let verdict = match timeout(limit, self.validator.validate(cluster, &run.arena)).await {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(e)) if e.is_fatal_for_run() => return Err(e),
                Ok(Err(e)) => {
                    warn!(cluster_id = %cluster.id, error = %e, "Skipping cluster");
                    continue;
                }
                Err(_) => {
                    warn!(cluster_id = %cluster.id, "Validation timed out, deferring");
                    self.validator.defer_on_timeout(cluster, &run.arena)?
                }
            };

            match verdict {
                Verdict::Promote(candidate) => self.admit(candidate, run).await?,
                Verdict::Defer { candidate, reason } => self.defer(candidate, reason, run).await?,
                Verdict::DroppedForSafety {
                    candidate_id,
                    violations,
                } => {
                    debug!(
                        candidate_id = %candidate_id,
                        violations = violations.len(),
                        "Dropped for safety"
                    );
                    run.counts.dropped_for_safety += 1;
                }
            }
        }

        info!(
            run_id = %run.run_id,
            promotable = run.promotable.len(),
            queued = run.counts.queued,
            dropped = run.counts.dropped_for_safety,
            "Validation complete"
        );
        Ok(())
    }

    /// Record the candidate in the graph and check that nothing it reaches
    /// fails a safety predicate and that it has evidence to cite.
    fn screen(&self, candidate: &GeneralPattern, run: &mut RunState) -> Admission {
        if let Err(e) = run
            .graph
            .add_rule(&candidate.id, &candidate.supporting, &candidate.members)
        {
            warn!(
                candidate_id = %candidate.id,
                error = %e,
                "Candidate has no provenance, skipping"
            );
            return Admission::NoProvenance;
        }

        let unsafe_fragments: BTreeSet<FragmentRef> =
            [SafetyPredicate::SafeForEvidence, SafetyPredicate::SafeForPrompt]
                .into_iter()
                .flat_map(|p| run.graph.unsafe_fragments(&candidate.id, &self.policy, p))
                .collect();
        if !unsafe_fragments.is_empty() {
            warn!(
                candidate_id = %candidate.id,
                fragments = unsafe_fragments.len(),
                "Candidate reaches unsafe fragments, dropped"
            );
            run.counts.dropped_for_safety += 1;
            return Admission::Unsafe;
        }

        if run.graph.evidence_refs(&candidate.id, 0.0).is_empty() {
            return Admission::NoEvidence;
        }
        Admission::Promotable
    }

    async fn admit(&self, candidate: GeneralPattern, run: &mut RunState) -> Result<()> {
        match self.screen(&candidate, run) {
            Admission::Promotable => run.keep_promotable(candidate),
            Admission::NoEvidence => {
                self.defer(candidate, UncertaintyReason::InsufficientInstances, run)
                    .await?
            }
            Admission::Unsafe | Admission::NoProvenance => {}
        }
        Ok(())
    }

    /// Queue a candidate, or feed what it adds to the open item deferred
    /// under the same conditions. Transcripts and counterexamples the item
    /// already holds are not fed again, so re-mining an unchanged corpus
    /// leaves the queue as it was.
    async fn defer(
        &self,
        candidate: GeneralPattern,
        reason: UncertaintyReason,
        run: &mut RunState,
    ) -> Result<()> {
        let Some(item) = self.queue.find_open(&candidate.conditions) else {
            let item_id = self.queue.enqueue(candidate, reason).await?;
            run.counts.queued += 1;
            run.touch_item(item_id);
            return Ok(());
        };
        if item.status == UncertaintyStatus::Escalated {
            debug!(
                item_id = %item.id,
                candidate_id = %candidate.id,
                "Item awaits review, not fed"
            );
            return Ok(());
        }

        let fresh_sources: Vec<String> = candidate
            .transcripts
            .iter()
            .filter(|t| !item.counted_transcripts.contains(*t))
            .cloned()
            .collect();
        let known: BTreeSet<&str> = item
            .candidate
            .counterexamples
            .iter()
            .map(|c| c.pattern_id.as_str())
            .collect();
        let (seen, fresh): (Vec<_>, Vec<_>) = candidate
            .counterexamples
            .iter()
            .cloned()
            .partition(|c| known.contains(c.pattern_id.as_str()));

        if fresh_sources.is_empty() && fresh.is_empty() {
            debug!(
                item_id = %item.id,
                candidate_id = %candidate.id,
                "Nothing new for pending item"
            );
            return Ok(());
        }

        let mut key_parts = vec![item.id.clone()];
        key_parts.extend(fresh_sources.iter().cloned());
        key_parts.extend(fresh.iter().map(|c| c.pattern_id.clone()));
        let key = hash_parts(&key_parts)[..16].to_string();

        let mut replacement = candidate.clone();
        replacement.counterexamples = seen;
        let update = EvidenceUpdate::new(key)
            .with_sources(fresh_sources)
            .with_counterexamples(fresh)
            .with_candidate(replacement)
            .with_reason(reason);

        let outcome = self.queue.apply_evidence(&item.id, update).await?;
        run.touch_item(item.id.clone());
        debug!(
            item_id = %item.id,
            status = %outcome.status,
            changed = outcome.changed,
            "Fed candidate to pending item"
        );

        match outcome.status {
            UncertaintyStatus::ResolvedPromote => {
                if self.screen(&candidate, run) == Admission::Promotable {
                    run.keep_promotable(candidate);
                }
            }
            UncertaintyStatus::ResolvedDiscard | UncertaintyStatus::Discarded => {
                run.counts.discarded += 1
            }
            UncertaintyStatus::Escalated => run.counts.escalated += 1,
            UncertaintyStatus::Pending => run.counts.queued += 1,
        }
        Ok(())
    }

    fn excerpt_for(&self, candidate: &GeneralPattern, arena: &PatternArena) -> String {
        let excerpt = candidate
            .supporting
            .iter()
            .chain(candidate.members.iter())
            .filter_map(|id| arena.find(id).and_then(|pid| arena.get(pid)))
            .map(|p| p.excerpt.as_str())
            .next()
            .unwrap_or_default();
        truncate_chars(excerpt, self.config.pipeline.excerpt_max_chars)
    }

    async fn persist(&self, run: &mut RunState) -> Result<()> {
        let candidates = std::mem::take(&mut run.promotable);
        let limit = Duration::from_millis(self.config.pipeline.similarity_timeout_ms);

        for candidate in candidates {
            self.cancel.checkpoint(RunPhase::Dedup.as_str())?;

            let excerpt = self.excerpt_for(&candidate, &run.arena);
            let mut rule = SkillRule::from_candidate(&candidate, excerpt);
            let refs = run.graph.evidence_refs(&rule.id, candidate.confidence());

            let check = self
                .deduplicator
                .check_against(&rule, self.knowledge.as_ref());
            let report = match timeout(limit, check).await {
                Ok(report) => report?,
                Err(_) => {
                    warn!(rule_id = %rule.id, "Dedup check timed out, deferring");
                    self.defer(candidate, UncertaintyReason::EvidenceTimeout, run).await?;
                    continue;
                }
            };

            match report.decision {
                DedupAction::Merge { entry_id } if entry_id != rule.id => {
                    match self.knowledge.get(&entry_id).await? {
                        Some(mut entry) => {
                            entry.absorb(&rule);
                            self.knowledge.promote(entry, refs).await?;
                            run.counts.merged += 1;
                            run.record_rule(&entry_id);
                            info!(
                                rule_id = %rule.id,
                                into = %entry_id,
                                "Merged into existing rule"
                            );
                        }
                        None => {
                            self.knowledge.promote(rule.clone(), refs).await?;
                            run.counts.promoted += 1;
                            run.record_rule(&rule.id);
                        }
                    }
                }
                DedupAction::DeprecateSubset { entry_id } => {
                    rule.deprecate(&entry_id);
                    self.knowledge.promote(rule.clone(), refs.clone()).await?;
                    self.knowledge.append_evidence_refs(&entry_id, refs).await?;
                    run.counts.deprecated += 1;
                    run.record_rule(&rule.id);
                    info!(
                        rule_id = %rule.id,
                        superseded_by = %entry_id,
                        "Stored as deprecated subset"
                    );
                }
                DedupAction::Differentiate { entry_id, proposed_scope } => {
                    rule.notes.push(format!(
                        "overlaps {}; distinct scope: {}",
                        entry_id,
                        proposed_scope.join(", ")
                    ));
                    self.knowledge.promote(rule.clone(), refs).await?;
                    run.counts.promoted += 1;
                    run.record_rule(&rule.id);
                }
                DedupAction::Merge { .. } | DedupAction::None => {
                    self.knowledge.promote(rule.clone(), refs).await?;
                    run.counts.promoted += 1;
                    run.record_rule(&rule.id);
                }
            }

            // A clean promotion settles whatever was deferred under the same
            // conditions, including a smaller earlier cluster.
            if let Some(item) = self.queue.find_open(&rule.conditions) {
                self.queue.resolve(&item.id, Resolution::Promote).await?;
                run.touch_item(item.id);
            }
        }

        info!(
            run_id = %run.run_id,
            promoted = run.counts.promoted,
            merged = run.counts.merged,
            deprecated = run.counts.deprecated,
            "Knowledge base updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{InMemoryEvidenceStore, Role, TranscriptFragment};
    use crate::knowledge::InMemoryKnowledgeBase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn aria_corpus() -> InMemoryEvidenceStore {
        InMemoryEvidenceStore::from_transcripts((1..=3).map(|i| {
            Transcript::new(format!("t{}", i))
                .with_message(Role::User, "The decorative SVG is announced by screen readers")
                .with_message(Role::Assistant, "Added aria-hidden=\"true\" to the decorative SVG")
        }))
    }

    fn pipeline(store: Arc<dyn EvidenceStore>) -> MiningPipeline {
        let config = MinerConfig::default();
        let queue = Arc::new(UncertaintyQueue::in_memory(
            config.uncertainty.clone(),
            config.validation.clone(),
        ));
        MiningPipeline::new(config, store, Arc::new(InMemoryKnowledgeBase::new()), queue)
    }

    /// Fails `get` a fixed number of times before delegating.
    struct Flaky {
        inner: InMemoryEvidenceStore,
        failures: AtomicU32,
        failure: StoreFailure,
    }

    #[async_trait]
    impl EvidenceStore for Flaky {
        async fn search(
            &self,
            query: &str,
            limit: usize,
        ) -> std::result::Result<Vec<TranscriptFragment>, StoreFailure> {
            self.inner.search(query, limit).await
        }

        async fn get(&self, transcript_id: &str) -> std::result::Result<Transcript, StoreFailure> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(self.failure.clone());
            }
            self.inner.get(transcript_id).await
        }
    }

    fn fast_retry(mut pipeline: MiningPipeline) -> MiningPipeline {
        pipeline.config.pipeline.retry.base_delay_ms = 1;
        pipeline.config.pipeline.retry.max_delay_ms = 2;
        pipeline
    }

    #[tokio::test]
    async fn test_run_promotes_recurring_fix() {
        let pipeline = pipeline(Arc::new(aria_corpus()));
        let report = pipeline.run("*").await;

        assert!(report.is_complete(), "{:?}", report.aborted);
        assert_eq!(report.counts.transcripts, 3);
        assert_eq!(report.counts.discovered, 3);
        assert_eq!(report.counts.promoted, 1);
        assert_eq!(report.promoted_rules.len(), 1);

        let refs = pipeline
            .knowledge()
            .evidence_refs(&report.promoted_rules[0])
            .await
            .unwrap();
        assert_eq!(refs.len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_updates_instead_of_duplicating() {
        let pipeline = pipeline(Arc::new(aria_corpus()));
        let first = pipeline.run("*").await;
        let second = pipeline.run("*").await;

        assert_eq!(first.promoted_rules, second.promoted_rules);
        let rules = pipeline.knowledge().list(None).await.unwrap();
        assert_eq!(rules.len(), 1);
        let refs = pipeline.knowledge().evidence_refs(&rules[0].id).await.unwrap();
        assert_eq!(refs.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Flaky {
            inner: aria_corpus(),
            failures: AtomicU32::new(2),
            failure: StoreFailure::Busy("locked".into()),
        };
        let pipeline = fast_retry(pipeline(Arc::new(store)));
        let report = pipeline.run("*").await;
        assert!(report.is_complete());
        assert_eq!(report.counts.transcripts, 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_with_counts() {
        let store = Flaky {
            inner: aria_corpus(),
            failures: AtomicU32::new(100),
            failure: StoreFailure::Unavailable("connection refused".into()),
        };
        let pipeline = fast_retry(pipeline(Arc::new(store)));
        let report = pipeline.run("*").await;

        assert!(!report.is_complete());
        assert!(!report.cancelled);
        assert!(report.aborted.unwrap().contains("unavailable"));
        assert_eq!(report.completed_phase, None);
        assert_eq!(report.counts.promoted, 0);
    }

    #[tokio::test]
    async fn test_drain_stops_after_discovery_checkpoint() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(Arc::new(aria_corpus()))
            .with_checkpoints(CheckpointManager::new(dir.path()));
        pipeline.cancel_signal().drain();

        let report = pipeline.run("*").await;
        assert!(report.cancelled);
        assert_eq!(report.completed_phase, Some(RunPhase::Discovery));
        assert!(pipeline.knowledge().list(None).await.unwrap().is_empty());

        pipeline.cancel_signal().clear();
        let resumed = pipeline.resume(&report.run_id).await.unwrap();
        assert!(resumed.is_complete(), "{:?}", resumed.aborted);
        assert_eq!(resumed.counts.discovered, 3);
        assert_eq!(resumed.counts.promoted, 1);
    }

    #[tokio::test]
    async fn test_cancel_leaves_knowledge_base_untouched() {
        let pipeline = pipeline(Arc::new(aria_corpus()));
        pipeline.cancel_signal().cancel();

        let report = pipeline.run("*").await;
        assert!(report.cancelled);
        assert!(pipeline.knowledge().list(None).await.unwrap().is_empty());
        assert!(pipeline.queue().is_empty());
    }

    #[tokio::test]
    async fn test_low_quality_session_not_mined() {
        let store = InMemoryEvidenceStore::from_transcripts((1..=3).map(|i| {
            Transcript::new(format!("t{}", i))
                .with_message(Role::User, "The decorative SVG is announced by screen readers")
                .with_message(Role::Assistant, "Added aria-hidden=\"true\" to the decorative SVG")
                .with_message(Role::User, "Never mind, forget it")
        }));
        let report = pipeline(Arc::new(store)).run("*").await;

        assert!(report.is_complete(), "{:?}", report.aborted);
        assert_eq!(report.counts.transcripts, 3);
        assert_eq!(report.counts.low_quality, 3);
        assert_eq!(report.counts.discovered, 0);
        assert_eq!(report.counts.promoted, 0);
    }

    #[tokio::test]
    async fn test_quality_gate_can_be_disabled() {
        let store = InMemoryEvidenceStore::from_transcripts((1..=3).map(|i| {
            Transcript::new(format!("t{}", i))
                .with_message(Role::User, "The decorative SVG is announced by screen readers")
                .with_message(Role::Assistant, "Added aria-hidden=\"true\" to the decorative SVG")
                .with_message(Role::User, "Never mind, forget it")
        }));
        let mut pipeline = pipeline(Arc::new(store));
        pipeline.config.quality.enabled = false;
        pipeline.quality = QualityScorer::new(pipeline.config.quality.clone());

        let report = pipeline.run("*").await;
        assert_eq!(report.counts.low_quality, 0);
        assert_eq!(report.counts.discovered, 3);
    }

    #[tokio::test]
    async fn test_unwritable_checkpoint_aborts_run() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("checkpoints");
        std::fs::write(&blocker, "not a directory").unwrap();
        let pipeline = pipeline(Arc::new(aria_corpus()))
            .with_checkpoints(CheckpointManager::new(&blocker));

        let report = pipeline.run("*").await;
        assert!(!report.is_complete());
        assert!(report.aborted.is_some());
        assert!(pipeline.knowledge().list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_without_checkpoints_fails() {
        let pipeline = pipeline(Arc::new(aria_corpus()));
        assert!(matches!(
            pipeline.resume("missing").await,
            Err(MinerError::Checkpoint(_))
        ));
    }
}
