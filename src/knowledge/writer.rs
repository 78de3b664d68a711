//! Dedicated writer thread for the SQLite knowledge base.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::types::{SkillRule, UpsertOutcome};
use super::{kb_err, kb_err_with};
use crate::error::Result;
use crate::provenance::EvidenceReference;

const SCHEMA_VERSION: i32 = 1;

pub(super) enum WriteCommand {
    Upsert {
        rule: Box<SkillRule>,
        response: oneshot::Sender<Result<UpsertOutcome>>,
    },
    AppendRefs {
        rule_id: String,
        refs: Vec<EvidenceReference>,
        response: oneshot::Sender<Result<usize>>,
    },
    /// Rule and its references in one transaction.
    Promote {
        rule: Box<SkillRule>,
        refs: Vec<EvidenceReference>,
        response: oneshot::Sender<Result<UpsertOutcome>>,
    },
    Shutdown,
}

pub(super) struct KnowledgeWriter {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<()>>,
}

impl KnowledgeWriter {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("knowledge-writer".into())
            .spawn(move || match Self::init_db(&db_path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process_commands(&conn, rx);
                }
                Err(e) => {
                    error!(error = %e, "Knowledge writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| kb_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| kb_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<WriteCommand> {
        self.tx.clone()
    }

    fn init_db(db_path: &PathBuf) -> Result<Connection> {
        let conn =
            Connection::open(db_path).map_err(|e| kb_err_with("Failed to open database", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| kb_err_with("Failed to enable WAL", e))?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn process_commands(conn: &Connection, rx: Receiver<WriteCommand>) {
        for cmd in rx {
            match cmd {
                WriteCommand::Upsert { rule, response } => {
                    let result = Self::in_transaction(conn, |tx| Self::upsert_rule(tx, &rule));
                    let _ = response.send(result);
                }
                WriteCommand::AppendRefs {
                    rule_id,
                    refs,
                    response,
                } => {
                    let result =
                        Self::in_transaction(conn, |tx| Self::append_refs(tx, &rule_id, &refs));
                    let _ = response.send(result);
                }
                WriteCommand::Promote {
                    rule,
                    refs,
                    response,
                } => {
                    let result = Self::in_transaction(conn, |tx| {
                        let outcome = Self::upsert_rule(tx, &rule)?;
                        Self::append_refs(tx, &rule.id, &refs)?;
                        Ok(outcome)
                    });
                    let _ = response.send(result);
                }
                WriteCommand::Shutdown => {
                    debug!("Knowledge writer received shutdown signal");
                    break;
                }
            }
        }
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                problem_class TEXT NOT NULL,
                solution_shape TEXT NOT NULL,
                status TEXT NOT NULL,
                confidence REAL NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_domain ON rules(domain);
            CREATE INDEX IF NOT EXISTS idx_rules_problem ON rules(problem_class);
            CREATE INDEX IF NOT EXISTS idx_rules_shape ON rules(solution_shape);

            CREATE TABLE IF NOT EXISTS evidence_refs (
                rule_id TEXT NOT NULL REFERENCES rules(id),
                transcript_id TEXT NOT NULL,
                message_index INTEGER NOT NULL,
                byte_start INTEGER NOT NULL,
                byte_end INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                confidence REAL NOT NULL,
                captured_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_evidence_unique
                ON evidence_refs(rule_id, transcript_id, message_index, content_hash);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );
            ",
        )
        .map_err(|e| kb_err_with("Failed to init schema", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| kb_err_with("Failed to record schema version", e))?;
        Ok(())
    }

    fn in_transaction<T>(
        conn: &Connection,
        work: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| kb_err_with("Failed to start transaction", e))?;
        let value = work(&tx)?;
        tx.commit().map_err(|e| kb_err_with("Failed to commit", e))?;
        Ok(value)
    }

    fn upsert_rule(tx: &Transaction<'_>, rule: &SkillRule) -> Result<UpsertOutcome> {
        let existing_created: Option<String> = tx
            .query_row(
                "SELECT created_at FROM rules WHERE id = ?1",
                params![&rule.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| kb_err_with("Failed to look up rule", e))?;

        let mut stored = rule.clone();
        if let Some(created) = &existing_created
            && let Ok(created) = chrono::DateTime::parse_from_rfc3339(created)
        {
            stored.created_at = created.with_timezone(&chrono::Utc);
        }
        let payload = serde_json::to_string(&stored)
            .map_err(|e| kb_err_with("Failed to serialize rule", e))?;

        tx.execute(
            "INSERT INTO rules (id, domain, problem_class, solution_shape, status, confidence,
                                payload, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               domain = excluded.domain,
               problem_class = excluded.problem_class,
               solution_shape = excluded.solution_shape,
               status = excluded.status,
               confidence = excluded.confidence,
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![
                &stored.id,
                stored.conditions.domain.as_str(),
                &stored.conditions.problem_class,
                &stored.conditions.solution_shape,
                stored.status.as_str(),
                stored.confidence() as f64,
                payload,
                stored.created_at.to_rfc3339(),
                stored.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| kb_err_with("Failed to upsert rule", e))?;

        let outcome = if existing_created.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!(rule_id = %stored.id, status = %stored.status, ?outcome, "Rule upserted");
        Ok(outcome)
    }

    /// Append-only; a reference already stored for the rule is ignored.
    fn append_refs(
        tx: &Transaction<'_>,
        rule_id: &str,
        refs: &[EvidenceReference],
    ) -> Result<usize> {
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM rules WHERE id = ?1)",
                params![rule_id],
                |row| row.get(0),
            )
            .map_err(|e| kb_err_with("Failed to look up rule", e))?;
        if !exists {
            return Err(kb_err(format!(
                "Cannot attach evidence to unknown rule {}",
                rule_id
            )));
        }

        let mut appended = 0;
        for r in refs {
            appended += tx
                .execute(
                    "INSERT OR IGNORE INTO evidence_refs
                       (rule_id, transcript_id, message_index, byte_start, byte_end,
                        content_hash, confidence, captured_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        rule_id,
                        &r.transcript_id,
                        r.range.message_index as i64,
                        r.range.byte_start as i64,
                        r.range.byte_end as i64,
                        &r.content_hash,
                        r.confidence as f64,
                        r.captured_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| kb_err_with("Failed to insert evidence reference", e))?;
        }

        debug!(rule_id = %rule_id, appended, offered = refs.len(), "Evidence references appended");
        Ok(appended)
    }
}

impl Drop for KnowledgeWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Knowledge writer thread panicked: {:?}", e);
        }
    }
}
