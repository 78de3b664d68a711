use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::cluster::Clustering;
use crate::error::{MinerError, Result};
use crate::features::PatternArena;
use crate::provenance::ProvenanceGraph;
use crate::utils::write_atomic;
use crate::validation::GeneralPattern;

/// Generates snapshot methods for checkpoint fields.
/// Creates: with_{name}_snapshot(), try_restore_{name}()
macro_rules! impl_snapshot_methods {
    ($($name:ident : $field:ident => $type:ty , $label:expr);+ $(;)?) => {
        $(
            paste::paste! {
                #[doc = concat!("Add ", $label, " snapshot for resuming the run.")]
                pub fn [<with_ $name _snapshot>](mut self, item: &$type) -> Result<Self> {
                    let yaml = serde_yaml_bw::to_string(item).map_err(|e| {
                        MinerError::Checkpoint(format!(
                            concat!("Failed to serialize ", $label, ": {}"),
                            e
                        ))
                    })?;
                    self.$field = Some(yaml);
                    Ok(self)
                }

                #[doc = concat!("Restore ", $label, " from checkpoint.")]
                pub fn [<try_restore_ $name>](&self) -> Result<$type> {
                    let yaml = self.$field.as_ref().ok_or_else(|| {
                        MinerError::Checkpoint(
                            concat!("Checkpoint has no ", $label, " snapshot").into(),
                        )
                    })?;
                    serde_yaml_bw::from_str(yaml).map_err(|e| {
                        MinerError::Checkpoint(format!(
                            concat!("Failed to deserialize ", $label, ": {}"),
                            e
                        ))
                    })
                }
            }
        )+
    };
}

/// Phases of a mining run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Discovery,
    Clustering,
    Validation,
    Dedup,
}

impl RunPhase {
    pub const ALL: [RunPhase; 4] = [
        Self::Discovery,
        Self::Clustering,
        Self::Validation,
        Self::Dedup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Clustering => "clustering",
            Self::Validation => "validation",
            Self::Dedup => "dedup",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<RunPhase> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome counts of a run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCounts {
    pub transcripts: usize,
    /// Transcripts the store could not return (not found, corrupt).
    pub skipped_transcripts: usize,
    /// Structural patterns extracted.
    pub discovered: usize,
    pub malformed: usize,
    pub clusters: usize,
    pub promoted: usize,
    pub merged: usize,
    pub deprecated: usize,
    pub queued: usize,
    pub discarded: usize,
    /// Queue items handed to a reviewer after automatic resolution gave up.
    pub escalated: usize,
    pub dropped_for_safety: usize,
    /// Transcripts that failed the session quality gate.
    pub low_quality: usize,
}

/// Resumable state written after a completed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub id: String,
    pub run_id: String,
    pub phase: RunPhase,
    pub created_at: DateTime<Utc>,
    pub counts: RunCounts,
    /// Queue items created or touched so far in this run.
    #[serde(default)]
    pub queue_delta: Vec<String>,
    /// Rules written so far in this run.
    #[serde(default)]
    pub promoted_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arena_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_snapshot: Option<String>,
}

impl RunCheckpoint {
    pub fn new(run_id: impl Into<String>, phase: RunPhase, counts: RunCounts) -> Self {
        let created_at = Utc::now();
        let id = format!(
            "{}_{:02}-{}",
            created_at.format("%Y%m%dT%H%M%SZ"),
            phase.index(),
            phase
        );
        Self {
            id,
            run_id: run_id.into(),
            phase,
            created_at,
            counts,
            queue_delta: Vec::new(),
            promoted_rules: Vec::new(),
            arena_snapshot: None,
            graph_snapshot: None,
            clustering_snapshot: None,
            candidates_snapshot: None,
        }
    }

    pub fn with_queue_delta(mut self, item_ids: &[String]) -> Self {
        self.queue_delta = item_ids.to_vec();
        self
    }

    pub fn with_promoted_rules(mut self, rule_ids: &[String]) -> Self {
        self.promoted_rules = rule_ids.to_vec();
        self
    }

    impl_snapshot_methods! {
        arena: arena_snapshot => PatternArena, "pattern arena";
        clustering: clustering_snapshot => Clustering, "clustering";
        candidates: candidates_snapshot => Vec<GeneralPattern>, "candidate pool";
    }

    pub fn with_graph_snapshot(mut self, graph: &ProvenanceGraph) -> Result<Self> {
        let yaml = serde_yaml_bw::to_string(graph).map_err(|e| {
            MinerError::Checkpoint(format!("Failed to serialize provenance graph: {}", e))
        })?;
        self.graph_snapshot = Some(yaml);
        Ok(self)
    }

    /// The graph's key index is not serialized; it is rebuilt here.
    pub fn try_restore_graph(&self) -> Result<ProvenanceGraph> {
        let yaml = self.graph_snapshot.as_ref().ok_or_else(|| {
            MinerError::Checkpoint("Checkpoint has no provenance graph snapshot".into())
        })?;
        let mut graph: ProvenanceGraph = serde_yaml_bw::from_str(yaml).map_err(|e| {
            MinerError::Checkpoint(format!("Failed to deserialize provenance graph: {}", e))
        })?;
        graph.reindex();
        Ok(graph)
    }
}

/// Checkpoint files under `<dir>/<run id>/<checkpoint id>.yaml`.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.dir.join(run_id)
    }

    fn checkpoint_file(&self, run_id: &str, checkpoint_id: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("{}.yaml", checkpoint_id))
    }

    pub async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let file = self.checkpoint_file(&checkpoint.run_id, &checkpoint.id);
        let yaml = serde_yaml_bw::to_string(checkpoint)?;
        write_atomic(&file, &yaml).await.map_err(|e| {
            MinerError::Checkpoint(format!("Failed to write {}: {}", file.display(), e))
        })?;

        info!(
            checkpoint_id = %checkpoint.id,
            run_id = %checkpoint.run_id,
            phase = %checkpoint.phase,
            "Checkpoint saved"
        );
        Ok(())
    }

    pub async fn load(&self, run_id: &str, checkpoint_id: &str) -> Result<RunCheckpoint> {
        let file = self.checkpoint_file(run_id, checkpoint_id);
        let content = fs::read_to_string(&file).await?;
        let checkpoint: RunCheckpoint = serde_yaml_bw::from_str(&content)?;
        Ok(checkpoint)
    }

    async fn checkpoint_ids(&self, run_id: &str) -> Result<Vec<String>> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir).await?;
        let mut ids: Vec<String> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "yaml")
                && let Some(name) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(name.to_string());
            }
        }

        // Newest first; timestamp-prefixed ids sort naturally.
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Every readable checkpoint of a run, newest first.
    pub async fn list(&self, run_id: &str) -> Result<Vec<RunCheckpoint>> {
        let mut checkpoints = Vec::new();
        for id in self.checkpoint_ids(run_id).await? {
            match self.load(run_id, &id).await {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!(checkpoint_id = %id, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(checkpoints)
    }

    /// The most recent checkpoint without loading the others.
    pub async fn latest(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let ids = self.checkpoint_ids(run_id).await?;
        let Some(latest_id) = ids.first() else {
            return Ok(None);
        };
        match self.load(run_id, latest_id).await {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(checkpoint_id = %latest_id, error = %e, "Failed to load latest checkpoint");
                Ok(None)
            }
        }
    }

    /// Delete old checkpoints, keeping only the most recent `keep_count`.
    pub async fn cleanup_old(&self, run_id: &str, keep_count: usize) -> Result<usize> {
        let ids = self.checkpoint_ids(run_id).await?;
        if ids.len() <= keep_count {
            return Ok(0);
        }

        let mut deleted = 0;
        for id in &ids[keep_count..] {
            if fs::remove_file(self.checkpoint_file(run_id, id)).await.is_ok() {
                deleted += 1;
            }
        }

        info!(run_id, deleted, "Cleaned up old checkpoints");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_phase_order() {
        assert_eq!(RunPhase::Discovery.next(), Some(RunPhase::Clustering));
        assert_eq!(RunPhase::Validation.next(), Some(RunPhase::Dedup));
        assert_eq!(RunPhase::Dedup.next(), None);
        assert!(RunPhase::Clustering < RunPhase::Dedup);
    }

    fn clustering_checkpoint() -> Result<RunCheckpoint> {
        RunCheckpoint::new("run-1", RunPhase::Clustering, RunCounts::default())
            .with_arena_snapshot(&PatternArena::new())?
            .with_graph_snapshot(&ProvenanceGraph::new())?
            .with_clustering_snapshot(&Clustering::default())
    }

    #[test]
    fn test_snapshot_round_trip() {
        let checkpoint = clustering_checkpoint().unwrap();

        assert!(checkpoint.try_restore_arena().unwrap().is_empty());
        assert!(checkpoint.try_restore_clustering().unwrap().clusters.is_empty());
        assert!(checkpoint.try_restore_graph().is_ok());
        assert!(matches!(
            checkpoint.try_restore_candidates(),
            Err(MinerError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_corrupt_snapshot_is_a_checkpoint_error() {
        let mut checkpoint = RunCheckpoint::new("run-1", RunPhase::Discovery, RunCounts::default());
        checkpoint.arena_snapshot = Some("- {not: [a pattern".into());
        assert!(matches!(
            checkpoint.try_restore_arena(),
            Err(MinerError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_latest() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());

        let counts = RunCounts {
            discovered: 4,
            ..Default::default()
        };
        for phase in [RunPhase::Discovery, RunPhase::Clustering] {
            let checkpoint = RunCheckpoint::new("run-1", phase, counts)
                .with_queue_delta(&["item-1".to_string()]);
            manager.save(&checkpoint).await.unwrap();
        }

        let latest = manager.latest("run-1").await.unwrap().unwrap();
        assert_eq!(latest.phase, RunPhase::Clustering);
        assert_eq!(latest.counts.discovered, 4);
        assert_eq!(latest.queue_delta, vec!["item-1".to_string()]);

        assert_eq!(manager.list("run-1").await.unwrap().len(), 2);
        assert!(manager.latest("other-run").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        for phase in RunPhase::ALL {
            manager
                .save(&RunCheckpoint::new("run-1", phase, RunCounts::default()))
                .await
                .unwrap();
        }

        assert_eq!(manager.cleanup_old("run-1", 1).await.unwrap(), 3);
        let remaining = manager.list("run-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].phase, RunPhase::Dedup);
    }
}
