//! Knowledge base of promoted rules.
//!
//! Writes are serialized through a single writer; readers see committed
//! snapshots. Evidence references are append-only.

mod memory;
mod sqlite;
mod types;
mod writer;

use async_trait::async_trait;

use crate::error::{MinerError, Result};
use crate::provenance::EvidenceReference;

pub use memory::InMemoryKnowledgeBase;
pub use sqlite::SqliteKnowledgeBase;
pub use types::{RuleStatus, SkillRule, UpsertOutcome};

fn kb_err(msg: impl std::fmt::Display) -> MinerError {
    MinerError::KnowledgeBase(msg.to_string())
}

fn kb_err_with<E: std::fmt::Display>(context: &str, err: E) -> MinerError {
    MinerError::KnowledgeBase(format!("{}: {}", context, err))
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn upsert(&self, rule: SkillRule) -> Result<UpsertOutcome>;

    /// Upsert a rule together with its evidence. Refuses a rule without
    /// references; either both land or neither does.
    async fn promote(&self, rule: SkillRule, refs: Vec<EvidenceReference>) -> Result<UpsertOutcome>;

    /// Returns how many references were new.
    async fn append_evidence_refs(
        &self,
        rule_id: &str,
        refs: Vec<EvidenceReference>,
    ) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<SkillRule>>;

    /// Active rules sharing domain, problem class or solution shape with
    /// `rule`, ordered by id.
    async fn get_similar(&self, rule: &SkillRule) -> Result<Vec<SkillRule>>;

    async fn evidence_refs(&self, rule_id: &str) -> Result<Vec<EvidenceReference>>;

    async fn list(&self, status: Option<RuleStatus>) -> Result<Vec<SkillRule>>;
}
