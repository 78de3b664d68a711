use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::reference::{EvidenceReference, Verification, verify_references};
use crate::error::{MinerError, Result};
use crate::evidence::{EvidenceStore, FragmentRef, TranscriptFragment};
use crate::features::StructuralPattern;
use crate::redaction::{Redactor, SafetyPredicate, TaintPolicy, TaintSet};
use crate::utils::content_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentNode {
    pub fragment: FragmentRef,
    /// Hash of the redacted text.
    pub content_hash: String,
    pub taint: TaintSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceNode {
    Rule { id: String },
    Pattern { id: String },
    Fragment(FragmentNode),
    Transcript { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// rule → pattern that applies and was correct
    Supports,
    /// rule → any other member pattern
    Member,
    /// pattern → the fragment holding the fix
    Fix,
    /// pattern → neighbouring fragment it drew context from
    Context,
    /// fragment → transcript
    PartOf,
}

/// Arena of rule, pattern, fragment and transcript nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceGraph {
    nodes: Vec<ProvenanceNode>,
    edges: Vec<Vec<(EdgeKind, NodeId)>>,
    #[serde(skip)]
    index: HashMap<String, NodeId>,
}

fn rule_key(id: &str) -> String {
    format!("rule:{}", id)
}

fn pattern_key(id: &str) -> String {
    format!("pattern:{}", id)
}

fn fragment_key(fragment: &FragmentRef) -> String {
    format!("fragment:{}", fragment)
}

fn transcript_key(id: &str) -> String {
    format!("transcript:{}", id)
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&ProvenanceNode> {
        self.nodes.get(id.0)
    }

    fn intern(&mut self, key: String, node: impl FnOnce() -> ProvenanceNode) -> NodeId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node());
        self.edges.push(Vec::new());
        self.index.insert(key, id);
        id
    }

    fn link(&mut self, from: NodeId, kind: EdgeKind, to: NodeId) {
        let out = &mut self.edges[from.0];
        if !out.contains(&(kind, to)) {
            out.push((kind, to));
        }
    }

    fn lookup(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Record a redacted fragment and the transcript it belongs to.
    pub fn add_fragment(&mut self, fragment: &TranscriptFragment) -> NodeId {
        let fragment_ref = fragment.fragment_ref();
        let node = self.intern(fragment_key(&fragment_ref), || {
            ProvenanceNode::Fragment(FragmentNode {
                fragment: fragment_ref.clone(),
                content_hash: content_hash(&fragment.text),
                taint: fragment.taint.clone(),
            })
        });
        let transcript = self.intern(transcript_key(&fragment.source_id), || {
            ProvenanceNode::Transcript {
                id: fragment.source_id.clone(),
            }
        });
        self.link(node, EdgeKind::PartOf, transcript);
        node
    }

    /// Record a pattern. Every fragment it points at must already be known.
    pub fn add_pattern(&mut self, pattern: &StructuralPattern) -> Result<NodeId> {
        let fix = self
            .lookup(&fragment_key(&pattern.fragment))
            .ok_or_else(|| unknown_fragment(&pattern.id, &pattern.fragment))?;
        let context = pattern
            .context
            .iter()
            .map(|f| {
                self.lookup(&fragment_key(f))
                    .ok_or_else(|| unknown_fragment(&pattern.id, f))
            })
            .collect::<Result<Vec<_>>>()?;

        let node = self.intern(pattern_key(&pattern.id), || ProvenanceNode::Pattern {
            id: pattern.id.clone(),
        });
        self.link(node, EdgeKind::Fix, fix);
        for c in context {
            self.link(node, EdgeKind::Context, c);
        }
        Ok(node)
    }

    /// Record a rule over already-known patterns.
    pub fn add_rule(
        &mut self,
        rule_id: &str,
        supporting: &[String],
        members: &[String],
    ) -> Result<NodeId> {
        let resolve = |id: &String| {
            self.lookup(&pattern_key(id)).ok_or_else(|| {
                MinerError::Other(format!(
                    "rule {} references unknown pattern {}",
                    rule_id, id
                ))
            })
        };
        let supporting_nodes = supporting.iter().map(resolve).collect::<Result<Vec<_>>>()?;
        let member_nodes = members
            .iter()
            .filter(|m| !supporting.contains(m))
            .map(resolve)
            .collect::<Result<Vec<_>>>()?;

        let node = self.intern(rule_key(rule_id), || ProvenanceNode::Rule {
            id: rule_id.to_string(),
        });
        for p in supporting_nodes {
            self.link(node, EdgeKind::Supports, p);
        }
        for p in member_nodes {
            self.link(node, EdgeKind::Member, p);
        }
        Ok(node)
    }

    fn walk(&self, start: NodeId, follow: impl Fn(EdgeKind) -> bool) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            for (kind, next) in &self.edges[node.0] {
                if follow(*kind) {
                    queue.push_back(*next);
                }
            }
        }
        seen
    }

    fn fragments_in(&self, nodes: BTreeSet<NodeId>) -> Vec<&FragmentNode> {
        let mut fragments: Vec<&FragmentNode> = nodes
            .into_iter()
            .filter_map(|n| match &self.nodes[n.0] {
                ProvenanceNode::Fragment(f) => Some(f),
                _ => None,
            })
            .collect();
        fragments.sort_by(|a, b| a.fragment.cmp(&b.fragment));
        fragments
    }

    /// Every fragment a rule can reach through any of its patterns.
    pub fn reachable_fragments(&self, rule_id: &str) -> Vec<&FragmentNode> {
        match self.lookup(&rule_key(rule_id)) {
            Some(rule) => self.fragments_in(self.walk(rule, |k| k != EdgeKind::PartOf)),
            None => Vec::new(),
        }
    }

    /// Reachable fragments whose taint fails `predicate`.
    pub fn unsafe_fragments(
        &self,
        rule_id: &str,
        policy: &TaintPolicy,
        predicate: SafetyPredicate,
    ) -> Vec<FragmentRef> {
        self.reachable_fragments(rule_id)
            .into_iter()
            .filter(|f| !policy.allows(predicate, &f.taint))
            .map(|f| f.fragment.clone())
            .collect()
    }

    /// One reference per fix fragment of a supporting pattern.
    pub fn evidence_refs(&self, rule_id: &str, confidence: f32) -> Vec<EvidenceReference> {
        let Some(rule) = self.lookup(&rule_key(rule_id)) else {
            return Vec::new();
        };
        let mut fixes = BTreeSet::new();
        for (kind, pattern) in &self.edges[rule.0] {
            if *kind != EdgeKind::Supports {
                continue;
            }
            fixes.extend(
                self.edges[pattern.0]
                    .iter()
                    .filter(|(k, _)| *k == EdgeKind::Fix)
                    .map(|(_, f)| *f),
            );
        }

        let captured_at = Utc::now();
        self.fragments_in(fixes)
            .into_iter()
            .map(|f| EvidenceReference {
                transcript_id: f.fragment.transcript_id.clone(),
                range: f.fragment.range,
                content_hash: f.content_hash.clone(),
                confidence,
                captured_at,
            })
            .collect()
    }

    /// Check a rule's references against the store.
    pub async fn verify(
        &self,
        rule_id: &str,
        store: &dyn EvidenceStore,
        redactor: &Redactor,
    ) -> Verification {
        verify_references(&self.evidence_refs(rule_id, 0.0), store, redactor).await
    }

    /// Rebuild the key index after deserializing.
    pub fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let key = match node {
                    ProvenanceNode::Rule { id } => rule_key(id),
                    ProvenanceNode::Pattern { id } => pattern_key(id),
                    ProvenanceNode::Fragment(f) => fragment_key(&f.fragment),
                    ProvenanceNode::Transcript { id } => transcript_key(id),
                };
                (key, NodeId(i))
            })
            .collect();
    }
}

fn unknown_fragment(pattern_id: &str, fragment: &FragmentRef) -> MinerError {
    MinerError::Other(format!(
        "pattern {} references unknown fragment {}",
        pattern_id, fragment
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{InMemoryEvidenceStore, Role, Transcript};
    use crate::features::FeatureExtractor;
    use crate::redaction::TaintLabel;

    struct Fixture {
        store: InMemoryEvidenceStore,
        graph: ProvenanceGraph,
        patterns: Vec<StructuralPattern>,
    }

    fn fixture(fix_text: &str) -> Fixture {
        let transcripts: Vec<Transcript> = ["t1", "t2"]
            .iter()
            .map(|id| {
                Transcript::new(*id)
                    .with_message(Role::User, "The decorative SVG is announced by screen readers")
                    .with_message(Role::Assistant, fix_text)
            })
            .collect();

        let redactor = Redactor::default();
        let extractor = FeatureExtractor::default();
        let mut graph = ProvenanceGraph::new();
        let mut patterns = Vec::new();
        for transcript in &transcripts {
            let redacted = redactor.redact_transcript(transcript);
            for fragment in &redacted.fragments {
                graph.add_fragment(fragment);
            }
            patterns.extend(extractor.extract_transcript(&redacted.fragments).patterns);
        }
        for pattern in &patterns {
            graph.add_pattern(pattern).unwrap();
        }
        Fixture {
            store: InMemoryEvidenceStore::from_transcripts(transcripts),
            graph,
            patterns,
        }
    }

    fn ids(patterns: &[StructuralPattern]) -> Vec<String> {
        patterns.iter().map(|p| p.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_evidence_refs_cover_fix_fragments_and_verify() {
        let mut f = fixture("Added aria-hidden=\"true\" to the decorative SVG");
        let ids = ids(&f.patterns);
        f.graph.add_rule("r1", &ids, &ids).unwrap();

        let refs = f.graph.evidence_refs("r1", 0.9);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.range.message_index == 1));

        // Fix plus user context in each transcript.
        assert_eq!(f.graph.reachable_fragments("r1").len(), 4);

        let verification = f.graph.verify("r1", &f.store, &Redactor::default()).await;
        assert!(verification.is_sound());
    }

    #[test]
    fn test_member_only_patterns_are_reachable_but_not_evidence() {
        let mut f = fixture("Added aria-hidden=\"true\" to the decorative SVG");
        let ids = ids(&f.patterns);
        f.graph.add_rule("r1", &ids[..1], &ids).unwrap();

        assert_eq!(f.graph.evidence_refs("r1", 0.9).len(), 1);
        assert_eq!(f.graph.reachable_fragments("r1").len(), 4);
    }

    #[test]
    fn test_unsafe_fragments_found_through_graph() {
        let mut f = fixture("Added api_key=abcd1234efgh5678ijkl to the config file");
        let ids = ids(&f.patterns);
        f.graph.add_rule("r1", &ids, &ids).unwrap();

        let flagged = f.graph.unsafe_fragments(
            "r1",
            &TaintPolicy::default(),
            SafetyPredicate::SafeForEvidence,
        );
        assert_eq!(flagged.len(), 2);
        assert!(
            f.graph
                .reachable_fragments("r1")
                .iter()
                .any(|n| n.taint.contains(TaintLabel::ContainsSecret))
        );
    }

    #[test]
    fn test_unknown_references_are_errors() {
        let mut graph = ProvenanceGraph::new();
        assert!(graph.add_rule("r1", &["missing".to_string()], &[]).is_err());
        assert!(graph.reachable_fragments("nope").is_empty());
    }

    #[test]
    fn test_reindex_after_roundtrip() {
        let mut f = fixture("Added aria-hidden=\"true\" to the decorative SVG");
        let ids = ids(&f.patterns);
        f.graph.add_rule("r1", &ids, &ids).unwrap();

        let json = serde_json::to_string(&f.graph).unwrap();
        let mut restored: ProvenanceGraph = serde_json::from_str(&json).unwrap();
        restored.reindex();
        assert_eq!(restored.evidence_refs("r1", 0.9).len(), 2);
    }
}
