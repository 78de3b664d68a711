//! End-to-end mining runs over small, fixed corpora.

mod fixtures;

use std::collections::BTreeSet;

use skill_miner::knowledge::{KnowledgeBase, RuleStatus};
use skill_miner::redaction::AuditLog;
use skill_miner::uncertainty::{QueryKind, UncertaintyReason, UncertaintyStatus};
use tempfile::TempDir;

use fixtures::{RAW_KEY, aria_corpus, harness, leaky_corpus, lodash_corpus};

#[tokio::test]
async fn test_recurring_fix_promotes_one_rule() {
    let h = harness(aria_corpus());
    let report = h.pipeline.run("*").await;

    assert!(report.is_complete(), "{:?}", report.aborted);
    assert_eq!(report.counts.transcripts, 3);
    assert_eq!(report.counts.discovered, 3);
    assert_eq!(report.counts.clusters, 1);
    assert_eq!(report.counts.promoted, 1);
    assert_eq!(report.counts.queued, 0);
    assert_eq!(report.counts.dropped_for_safety, 0);

    let rules = h.knowledge.list(Some(RuleStatus::Active)).await.unwrap();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.scores.coverage, 1.0);
    assert_eq!(rule.scores.predictive_power, 1.0);
    assert!(rule.confidence() >= 0.7);
    assert_eq!(rule.instance_count, 3);
    assert!(rule.excerpt.contains("aria-hidden"));
    assert!(!rule.principle.is_empty());

    let refs = h.knowledge.evidence_refs(&rule.id).await.unwrap();
    assert_eq!(refs.len(), 3);
    let transcripts: BTreeSet<&str> = refs.iter().map(|r| r.transcript_id.as_str()).collect();
    assert_eq!(transcripts, BTreeSet::from(["t1", "t2", "t3"]));
    assert!(refs.iter().all(|r| r.range.message_index == 1));
}

#[tokio::test]
async fn test_conflicting_fixes_are_queued() {
    let h = harness(lodash_corpus());
    let report = h.pipeline.run("*").await;

    assert!(report.is_complete(), "{:?}", report.aborted);
    assert_eq!(report.counts.promoted, 0);
    assert_eq!(report.counts.queued, 1);
    assert!(h.knowledge.list(None).await.unwrap().is_empty());

    let pending = h.queue.pending();
    assert_eq!(pending.len(), 1);
    let item = &pending[0];
    assert_eq!(item.status, UncertaintyStatus::Pending);
    assert_eq!(item.reason, UncertaintyReason::ConflictingEvidence);
    assert!(item.candidate.confidence() < 0.7);
    assert!(item.boundary.counterexample_would_discard);
    assert_eq!(item.boundary.instances_needed, 1);
    assert!((3..=7).contains(&item.queries.len()));
    assert!(item.queries.iter().any(|q| q.kind == QueryKind::Negative));
    assert_eq!(report.queue_delta, vec![item.id.clone()]);
}

#[tokio::test]
async fn test_secret_bearing_fix_is_dropped() {
    let dir = TempDir::new().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let h = harness(leaky_corpus());
    let pipeline = h.pipeline.with_audit_log(AuditLog::new(&audit_path));

    let report = pipeline.run("*").await;
    assert!(report.is_complete(), "{:?}", report.aborted);
    assert_eq!(report.counts.dropped_for_safety, 1);
    assert_eq!(report.counts.promoted, 0);
    assert_eq!(report.counts.queued, 0);

    assert!(h.knowledge.list(None).await.unwrap().is_empty());
    assert!(h.queue.is_empty());

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert_eq!(audit.lines().count(), 3);
    assert!(!audit.contains(RAW_KEY));

    let reports = AuditLog::new(&audit_path).load().await.unwrap();
    assert!(reports.iter().all(|r| r.redacted_token_count >= 1));
}

#[tokio::test]
async fn test_query_limits_discovery() {
    let h = harness(fixtures::corpus([
        fixtures::aria("t1"),
        fixtures::aria("t2"),
        fixtures::aria("t3"),
        fixtures::lodash("t4", "Pinned lodash to 4.17.20 in package.json"),
    ]));
    let report = h.pipeline.run("lodash").await;

    assert!(report.is_complete());
    assert_eq!(report.counts.transcripts, 1);
    assert_eq!(report.counts.promoted, 0);
}
