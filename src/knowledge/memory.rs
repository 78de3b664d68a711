use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::{RuleStatus, SkillRule, UpsertOutcome};
use super::{KnowledgeBase, kb_err};
use crate::error::Result;
use crate::provenance::EvidenceReference;

#[derive(Debug, Default)]
struct Tables {
    rules: BTreeMap<String, SkillRule>,
    evidence: BTreeMap<String, Vec<EvidenceReference>>,
}

impl Tables {
    fn upsert(&mut self, mut rule: SkillRule) -> UpsertOutcome {
        match self.rules.get(&rule.id) {
            Some(existing) => {
                rule.created_at = existing.created_at;
                self.rules.insert(rule.id.clone(), rule);
                UpsertOutcome::Updated
            }
            None => {
                self.rules.insert(rule.id.clone(), rule);
                UpsertOutcome::Inserted
            }
        }
    }

    fn append(&mut self, rule_id: &str, refs: Vec<EvidenceReference>) -> usize {
        let stored = self.evidence.entry(rule_id.to_string()).or_default();
        let mut appended = 0;
        for r in refs {
            let duplicate = stored.iter().any(|s| {
                s.transcript_id == r.transcript_id
                    && s.range.message_index == r.range.message_index
                    && s.content_hash == r.content_hash
            });
            if !duplicate {
                stored.push(r);
                appended += 1;
            }
        }
        appended
    }
}

/// Knowledge base held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    tables: RwLock<Tables>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn upsert(&self, rule: SkillRule) -> Result<UpsertOutcome> {
        Ok(self.tables.write().upsert(rule))
    }

    async fn promote(
        &self,
        rule: SkillRule,
        refs: Vec<EvidenceReference>,
    ) -> Result<UpsertOutcome> {
        if refs.is_empty() {
            return Err(kb_err(format!("Rule {} has no evidence references", rule.id)));
        }
        let mut tables = self.tables.write();
        let id = rule.id.clone();
        let outcome = tables.upsert(rule);
        tables.append(&id, refs);
        Ok(outcome)
    }

    async fn append_evidence_refs(
        &self,
        rule_id: &str,
        refs: Vec<EvidenceReference>,
    ) -> Result<usize> {
        let mut tables = self.tables.write();
        if !tables.rules.contains_key(rule_id) {
            return Err(kb_err(format!(
                "Cannot attach evidence to unknown rule {}",
                rule_id
            )));
        }
        Ok(tables.append(rule_id, refs))
    }

    async fn get(&self, id: &str) -> Result<Option<SkillRule>> {
        Ok(self.tables.read().rules.get(id).cloned())
    }

    async fn get_similar(&self, rule: &SkillRule) -> Result<Vec<SkillRule>> {
        Ok(self
            .tables
            .read()
            .rules
            .values()
            .filter(|r| r.is_active() && r.is_related(rule))
            .cloned()
            .collect())
    }

    async fn evidence_refs(&self, rule_id: &str) -> Result<Vec<EvidenceReference>> {
        let mut refs = self
            .tables
            .read()
            .evidence
            .get(rule_id)
            .cloned()
            .unwrap_or_default();
        refs.sort_by(|a, b| {
            let left = (&a.transcript_id, a.range.message_index);
            left.cmp(&(&b.transcript_id, b.range.message_index))
        });
        Ok(refs)
    }

    async fn list(&self, status: Option<RuleStatus>) -> Result<Vec<SkillRule>> {
        Ok(self
            .tables
            .read()
            .rules
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }
}
