//! SQLite knowledge base: one writer thread, a pool of read-only connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tokio::sync::oneshot;
use tracing::debug;

use super::types::{RuleStatus, SkillRule, UpsertOutcome};
use super::writer::{KnowledgeWriter, WriteCommand};
use super::{KnowledgeBase, kb_err, kb_err_with};
use crate::error::Result;
use crate::evidence::FragmentRange;
use crate::provenance::EvidenceReference;

const DEFAULT_READ_POOL_SIZE: usize = 4;

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let conn = Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| kb_err_with("Failed to open read connection", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct KnowledgeInner {
    writer_tx: Sender<WriteCommand>,
    read_pool: ReadPool,
    db_path: PathBuf,
    /// Keeps the writer thread alive for as long as the store is.
    #[allow(dead_code)]
    writer: KnowledgeWriter,
}

#[derive(Clone)]
pub struct SqliteKnowledgeBase {
    inner: Arc<KnowledgeInner>,
}

impl SqliteKnowledgeBase {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| kb_err_with("Failed to create db directory", e))?;
        }

        let writer = KnowledgeWriter::new(db_path.clone())?;
        let writer_tx = writer.sender();
        let read_pool = ReadPool::new(&db_path, pool_size)?;

        Ok(Self {
            inner: Arc::new(KnowledgeInner {
                writer_tx,
                read_pool,
                db_path,
                writer,
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> WriteCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .writer_tx
            .send(build(tx))
            .map_err(|_| kb_err("Writer thread disconnected"))?;
        rx.await
            .map_err(|_| kb_err("Writer response channel dropped"))?
    }

    async fn read<T: Send + 'static>(
        &self,
        query: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
    ) -> Result<T> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            query(&guard)
        })
        .await
        .map_err(|e| kb_err_with("Query task failed", e))?
    }

    fn query_rules(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SkillRule>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| kb_err_with("Failed to prepare statement", e))?;
        let rows = stmt
            .query_map(args, |row| row.get::<_, String>(0))
            .map_err(|e| kb_err_with("Failed to query rules", e))?;

        let mut rules = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| kb_err_with("Failed to read row", e))?;
            let rule: SkillRule = serde_json::from_str(&payload)
                .map_err(|e| kb_err_with("Failed to deserialize rule", e))?;
            rules.push(rule);
        }
        Ok(rules)
    }
}

#[async_trait]
impl KnowledgeBase for SqliteKnowledgeBase {
    async fn upsert(&self, rule: SkillRule) -> Result<UpsertOutcome> {
        self.send(|response| WriteCommand::Upsert {
            rule: Box::new(rule),
            response,
        })
        .await
    }

    async fn promote(
        &self,
        rule: SkillRule,
        refs: Vec<EvidenceReference>,
    ) -> Result<UpsertOutcome> {
        if refs.is_empty() {
            return Err(kb_err(format!("Rule {} has no evidence references", rule.id)));
        }
        self.send(|response| WriteCommand::Promote {
            rule: Box::new(rule),
            refs,
            response,
        })
        .await
    }

    async fn append_evidence_refs(
        &self,
        rule_id: &str,
        refs: Vec<EvidenceReference>,
    ) -> Result<usize> {
        let rule_id = rule_id.to_string();
        self.send(|response| WriteCommand::AppendRefs {
            rule_id,
            refs,
            response,
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<SkillRule>> {
        let id = id.to_string();
        self.read(move |conn| {
            let payload: Option<String> = conn
                .query_row("SELECT payload FROM rules WHERE id = ?1", params![&id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|e| kb_err_with("Failed to get rule", e))?;
            payload
                .map(|p| {
                    serde_json::from_str(&p)
                        .map_err(|e| kb_err_with("Failed to deserialize rule", e))
                })
                .transpose()
        })
        .await
    }

    async fn get_similar(&self, rule: &SkillRule) -> Result<Vec<SkillRule>> {
        let target = rule.clone();
        let similar = self
            .read(move |conn| {
                let active = Self::query_rules(
                    conn,
                    "SELECT payload FROM rules WHERE status = 'active' ORDER BY id",
                    params![],
                )?;
                Ok(active
                    .into_iter()
                    .filter(|r| r.is_related(&target))
                    .collect::<Vec<_>>())
            })
            .await?;
        debug!(rule_id = %rule.id, similar = similar.len(), "Similar rules fetched");
        Ok(similar)
    }

    async fn evidence_refs(&self, rule_id: &str) -> Result<Vec<EvidenceReference>> {
        let rule_id = rule_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT transcript_id, message_index, byte_start, byte_end,
                            content_hash, confidence, captured_at
                       FROM evidence_refs
                       WHERE rule_id = ?1
                       ORDER BY transcript_id, message_index",
                )
                .map_err(|e| kb_err_with("Failed to prepare statement", e))?;
            let rows = stmt
                .query_map(params![&rule_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .map_err(|e| kb_err_with("Failed to query evidence references", e))?;

            let mut refs = Vec::new();
            for row in rows {
                let (
                    transcript_id,
                    message_index,
                    byte_start,
                    byte_end,
                    content_hash,
                    confidence,
                    captured,
                ) = row.map_err(|e| kb_err_with("Failed to read row", e))?;
                let captured_at = DateTime::parse_from_rfc3339(&captured)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| kb_err_with("Failed to parse timestamp", e))?;
                refs.push(EvidenceReference {
                    transcript_id,
                    range: FragmentRange {
                        message_index: message_index as usize,
                        byte_start: byte_start as usize,
                        byte_end: byte_end as usize,
                    },
                    content_hash,
                    confidence: confidence as f32,
                    captured_at,
                });
            }
            Ok(refs)
        })
        .await
    }

    async fn list(&self, status: Option<RuleStatus>) -> Result<Vec<SkillRule>> {
        self.read(move |conn| match status {
            Some(status) => Self::query_rules(
                conn,
                "SELECT payload FROM rules WHERE status = ?1 ORDER BY id",
                params![status.as_str()],
            ),
            None => Self::query_rules(conn, "SELECT payload FROM rules ORDER BY id", params![]),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Domain;
    use crate::utils::content_hash;
    use crate::validation::{ApplicabilityConditions, ConfidenceScores};
    use chrono::Utc;
    use tempfile::TempDir;

    fn rule(id: &str, domain: Domain, problem: &str) -> SkillRule {
        let now = Utc::now();
        SkillRule {
            id: id.into(),
            principle: format!("principle {}", id),
            signature: format!("{}/{}/add-attribute", domain, problem),
            conditions: ApplicabilityConditions {
                domain,
                problem_class: problem.into(),
                solution_shape: "add-attribute".into(),
                file_type: None,
            },
            solution_phrase: "added aria-hidden=true decorative svg".into(),
            excerpt: "Added aria-hidden=\"true\" to the decorative SVG".into(),
            scores: ConfidenceScores {
                confidence: 0.9,
                ..Default::default()
            },
            instance_count: 3,
            members: vec!["p1".into()],
            status: RuleStatus::Active,
            superseded_by: None,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn reference(transcript: &str) -> EvidenceReference {
        EvidenceReference {
            transcript_id: transcript.into(),
            range: FragmentRange::message(1, 40),
            content_hash: content_hash(transcript),
            confidence: 0.9,
            captured_at: Utc::now(),
        }
    }

    fn open(dir: &TempDir) -> SqliteKnowledgeBase {
        SqliteKnowledgeBase::open(dir.path().join("knowledge.db")).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_then_update() {
        let dir = TempDir::new().unwrap();
        let kb = open(&dir);

        assert_eq!(
            kb.upsert(rule("r1", Domain::Accessibility, "missing-attribute")).await.unwrap(),
            UpsertOutcome::Inserted
        );
        let mut changed = rule("r1", Domain::Accessibility, "missing-attribute");
        changed.principle = "updated".into();
        assert_eq!(kb.upsert(changed).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(kb.get("r1").await.unwrap().unwrap().principle, "updated");
        assert!(kb.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_requires_evidence() {
        let dir = TempDir::new().unwrap();
        let kb = open(&dir);

        let err = kb
            .promote(rule("r1", Domain::Accessibility, "missing-attribute"), Vec::new())
            .await;
        assert!(err.is_err());
        assert!(kb.get("r1").await.unwrap().is_none());

        kb.promote(
            rule("r1", Domain::Accessibility, "missing-attribute"),
            vec![reference("t1"), reference("t2")],
        )
        .await
        .unwrap();
        assert_eq!(kb.evidence_refs("r1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_evidence_refs_are_append_only_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let kb = open(&dir);
        kb.promote(rule("r1", Domain::Accessibility, "missing-attribute"), vec![reference("t1")])
            .await
            .unwrap();

        let appended = kb
            .append_evidence_refs("r1", vec![reference("t1"), reference("t2")])
            .await
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(kb.evidence_refs("r1").await.unwrap().len(), 2);

        assert!(kb.append_evidence_refs("ghost", vec![reference("t3")]).await.is_err());
    }

    #[tokio::test]
    async fn test_get_similar_uses_conditions_and_skips_deprecated() {
        let dir = TempDir::new().unwrap();
        let kb = open(&dir);
        kb.upsert(rule("a", Domain::Accessibility, "missing-attribute")).await.unwrap();
        let mut deprecated = rule("b", Domain::Accessibility, "missing-attribute");
        deprecated.deprecate("a");
        kb.upsert(deprecated).await.unwrap();
        let mut unrelated = rule("c", Domain::Dependency, "version-conflict");
        unrelated.conditions.solution_shape = "pin-dependency".into();
        unrelated.solution_phrase = "pinned lodash 4.17.20 package.json".into();
        kb.upsert(unrelated).await.unwrap();

        let candidate = rule("new", Domain::Accessibility, "missing-attribute");
        let similar = kb.get_similar(&candidate).await.unwrap();
        assert_eq!(similar.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a"]);

        assert_eq!(kb.list(Some(RuleStatus::Deprecated)).await.unwrap().len(), 1);
        assert_eq!(kb.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_similar_finds_same_fix_under_other_classifier() {
        let dir = TempDir::new().unwrap();
        let kb = open(&dir);
        let mut elsewhere = rule("a", Domain::General, "svg");
        elsewhere.conditions.solution_shape = "add-code".into();
        kb.upsert(elsewhere).await.unwrap();
        let mut other_fix = rule("b", Domain::Dependency, "version-conflict");
        other_fix.conditions.solution_shape = "pin-dependency".into();
        other_fix.solution_phrase = "pinned lodash 4.17.20 package.json".into();
        kb.upsert(other_fix).await.unwrap();

        let candidate = rule("new", Domain::Accessibility, "missing-attribute");
        let similar = kb.get_similar(&candidate).await.unwrap();
        assert_eq!(similar.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let kb = open(&dir);
            let r1 = rule("r1", Domain::Accessibility, "missing-attribute");
            kb.promote(r1, vec![reference("t1")]).await.unwrap();
        }
        let kb = open(&dir);
        assert!(kb.get("r1").await.unwrap().is_some());
        assert_eq!(kb.evidence_refs("r1").await.unwrap().len(), 1);
    }
}
