//! Runs against the on-disk workspace layout, then reopen each store cold.

mod fixtures;

use std::sync::Arc;

use skill_miner::config::{MinerConfig, MinerPaths};
use skill_miner::knowledge::{KnowledgeBase, SqliteKnowledgeBase};
use skill_miner::pipeline::{CheckpointManager, MiningPipeline, RunPhase};
use skill_miner::redaction::AuditLog;
use skill_miner::uncertainty::{Resolution, UncertaintyQueue, UncertaintyStatus};
use skill_miner::{InMemoryEvidenceStore, MinerError};
use tempfile::TempDir;

use fixtures::{aria_corpus, leaky_corpus, lodash_corpus};

async fn open(paths: &MinerPaths, store: InMemoryEvidenceStore) -> MiningPipeline {
    MiningPipeline::open(paths, MinerConfig::default(), Arc::new(store))
        .await
        .unwrap()
}

async fn reopen_queue(paths: &MinerPaths) -> UncertaintyQueue {
    let config = MinerConfig::default();
    UncertaintyQueue::open(&paths.queue_file, config.uncertainty, config.validation)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_promoted_rule_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    let report = open(&paths, aria_corpus()).await.run("*").await;
    assert!(report.is_complete(), "{:?}", report.aborted);
    assert_eq!(report.promoted_rules.len(), 1);
    let rule_id = report.promoted_rules[0].clone();

    let kb = SqliteKnowledgeBase::open(&paths.knowledge_db).unwrap();
    let rule = kb.get(&rule_id).await.unwrap().expect("rule persisted");
    assert_eq!(rule.instance_count, 3);
    assert_eq!(kb.evidence_refs(&rule_id).await.unwrap().len(), 3);

    let reports = AuditLog::new(&paths.audit_log).load().await.unwrap();
    assert_eq!(reports.len(), 3);
}

#[tokio::test]
async fn test_rerun_over_same_workspace_keeps_one_rule() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    open(&paths, aria_corpus()).await.run("*").await;
    let second = open(&paths, aria_corpus()).await.run("*").await;
    assert!(second.is_complete());

    let kb = SqliteKnowledgeBase::open(&paths.knowledge_db).unwrap();
    let rules = kb.list(None).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(kb.evidence_refs(&rules[0].id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_queued_item_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    let report = open(&paths, lodash_corpus()).await.run("*").await;
    assert_eq!(report.counts.queued, 1);

    let queue = reopen_queue(&paths).await;
    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, report.queue_delta[0]);

    open(&paths, lodash_corpus()).await.run("*").await;
    assert_eq!(reopen_queue(&paths).await.len(), 1);
}

#[tokio::test]
async fn test_resolution_persists_and_repeats_cleanly() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    let report = open(&paths, lodash_corpus()).await.run("*").await;
    let item_id = report.queue_delta[0].clone();

    let queue = reopen_queue(&paths).await;
    assert!(queue.resolve(&item_id, Resolution::Discard).await.unwrap().changed);
    drop(queue);

    let queue = reopen_queue(&paths).await;
    let again = queue.resolve(&item_id, Resolution::Discard).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.status, UncertaintyStatus::ResolvedDiscard);
    assert!(matches!(
        queue.resolve(&item_id, Resolution::Promote).await,
        Err(MinerError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_checkpoint_written_per_phase() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    let report = open(&paths, aria_corpus()).await.run("*").await;
    assert_eq!(report.completed_phase, Some(RunPhase::Dedup));

    let checkpoints = CheckpointManager::new(&paths.checkpoints_dir)
        .list(&report.run_id)
        .await
        .unwrap();
    assert_eq!(checkpoints.len(), RunPhase::ALL.len());
    assert_eq!(checkpoints[0].phase, RunPhase::Dedup);
    assert_eq!(checkpoints[0].counts, report.counts);
}

#[tokio::test]
async fn test_audit_log_never_holds_raw_secret() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());

    open(&paths, leaky_corpus()).await.run("*").await;
    let raw = std::fs::read_to_string(&paths.audit_log).unwrap();
    assert!(!raw.contains(fixtures::RAW_KEY));
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let paths = MinerPaths::new(dir.path());
    let mut config = MinerConfig::default();
    config.validation.min_instances = 0;

    let result = MiningPipeline::open(&paths, config, Arc::new(aria_corpus())).await;
    assert!(matches!(result, Err(MinerError::Config(_))));
    assert!(!paths.knowledge_db.exists());
}
