use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::collaborators::{
    CritiqueProvider, DescribeRequest, Describer, NoopCritique, SimilarityModel,
    TemplateDescriber, TermFrequencyModel,
};
use super::types::{
    ApplicabilityConditions, ConfidenceScores, Counterexample, CounterexampleKind,
    GeneralPattern, MissingSignal, SafetyViolation, Verdict,
};
use crate::cluster::InstanceCluster;
use crate::config::{TaintPolicyConfig, ValidationConfig};
use crate::error::{MinerError, Result};
use crate::features::{OutcomeHint, PatternArena, StructuralPattern};
use crate::redaction::{SafetyPredicate, TaintPolicy, TaintSet};
use crate::uncertainty::UncertaintyReason;
use crate::utils::hash_parts;

/// Everything about a candidate that needs no collaborator.
#[derive(Debug, Clone)]
pub struct Draft {
    pub candidate: GeneralPattern,
    applying_phrases: Vec<String>,
}

pub struct GeneralizationValidator {
    config: ValidationConfig,
    policy: TaintPolicy,
    describer: Arc<dyn Describer>,
    critique: Arc<dyn CritiqueProvider>,
    similarity: Arc<dyn SimilarityModel>,
}

impl GeneralizationValidator {
    pub fn new(config: ValidationConfig, taint: TaintPolicyConfig) -> Self {
        Self {
            config,
            policy: TaintPolicy::new(taint),
            describer: Arc::new(TemplateDescriber),
            critique: Arc::new(NoopCritique),
            similarity: Arc::new(TermFrequencyModel),
        }
    }

    pub fn with_describer(mut self, describer: Arc<dyn Describer>) -> Self {
        self.describer = describer;
        self
    }

    pub fn with_critique(mut self, critique: Arc<dyn CritiqueProvider>) -> Self {
        self.critique = critique;
        self
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn similarity_model(&self) -> Arc<dyn SimilarityModel> {
        Arc::clone(&self.similarity)
    }

    /// Validate one cluster's candidate.
    pub async fn validate(
        &self,
        cluster: &InstanceCluster,
        arena: &PatternArena,
    ) -> Result<Verdict> {
        let draft = self.draft(cluster, arena)?;
        let violations = self.safety_violations(&draft.candidate.taint);
        if !violations.is_empty() {
            return Ok(self.drop_for_safety(draft.candidate, violations));
        }

        let Draft {
            mut candidate,
            applying_phrases,
        } = draft;

        let coherence = self.coherence(&applying_phrases).await?;
        candidate.scores = self.score(
            candidate.scores.coverage,
            candidate.scores.predictive_power,
            coherence,
        );
        if coherence < self.config.low_coherence {
            candidate.missing_signals.push(MissingSignal::LowCoherence);
        }

        let request = DescribeRequest {
            conditions: &candidate.conditions,
            solution_phrase: &candidate.solution_phrase,
            instance_count: candidate.instance_count,
        };
        candidate.principle = match self.describer.describe(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(candidate_id = %candidate.id, error = %e, "Describer failed, using template");
                TemplateDescriber::compose(&request)
            }
        };

        let flagged = match self.critique.critique(&candidate).await {
            Ok(critique) => {
                candidate.critique_notes = critique.notes;
                critique.overgeneralized
            }
            Err(e) => {
                warn!(candidate_id = %candidate.id, error = %e, "Critique failed, ignoring");
                false
            }
        };

        Ok(self.decide(candidate, flagged))
    }

    /// Verdict for a candidate whose validation ran out of time.
    /// The safety gate still applies.
    pub fn defer_on_timeout(
        &self,
        cluster: &InstanceCluster,
        arena: &PatternArena,
    ) -> Result<Verdict> {
        let draft = self.draft(cluster, arena)?;
        let violations = self.safety_violations(&draft.candidate.taint);
        if !violations.is_empty() {
            return Ok(self.drop_for_safety(draft.candidate, violations));
        }
        let mut candidate = draft.candidate;
        candidate.principle = TemplateDescriber::compose(&DescribeRequest {
            conditions: &candidate.conditions,
            solution_phrase: &candidate.solution_phrase,
            instance_count: candidate.instance_count,
        });
        Ok(Verdict::Defer {
            candidate,
            reason: UncertaintyReason::EvidenceTimeout,
        })
    }

    /// Labels that make a taint set unusable in a promoted rule or a prompt.
    pub fn safety_violations(&self, taint: &TaintSet) -> Vec<SafetyViolation> {
        [SafetyPredicate::SafeForEvidence, SafetyPredicate::SafeForPrompt]
            .into_iter()
            .flat_map(|predicate| {
                self.policy
                    .violations(predicate, taint)
                    .into_iter()
                    .map(move |label| SafetyViolation { predicate, label })
            })
            .collect()
    }

    /// Coverage, predictive power and counterexamples; coherence pending.
    pub fn draft(&self, cluster: &InstanceCluster, arena: &PatternArena) -> Result<Draft> {
        let members: Vec<&StructuralPattern> = arena.resolve(&cluster.members).collect();
        let Some(representative) = arena.get(cluster.representative) else {
            return Err(MinerError::InsufficientEvidence {
                have: 0,
                need: self.config.min_instances,
            });
        };
        if members.is_empty() {
            return Err(MinerError::InsufficientEvidence {
                have: 0,
                need: self.config.min_instances,
            });
        }

        let conditions = ApplicabilityConditions {
            domain: representative.classifier.domain,
            problem_class: representative.classifier.problem_class.clone(),
            solution_shape: representative.classifier.solution_shape.clone(),
            file_type: cluster.conditions.file_type.clone(),
        };

        let mut applying = Vec::new();
        let mut supporting = Vec::new();
        let mut counterexamples = Vec::new();
        for member in &members {
            if !conditions.applies_to(member) {
                counterexamples.push(counterexample(member, CounterexampleKind::NotApplicable));
                continue;
            }
            applying.push(*member);
            if member.classifier.solution_shape != conditions.solution_shape {
                counterexamples.push(counterexample(member, CounterexampleKind::ShapeMismatch));
            } else if member.outcome.hint == OutcomeHint::Failure {
                counterexamples.push(counterexample(member, CounterexampleKind::OutcomeFailure));
            } else {
                supporting.push(member.id.clone());
            }
        }

        let n = members.len() as f32;
        let coverage = applying.len() as f32 / n;
        let predictive_power = if applying.is_empty() {
            0.0
        } else {
            supporting.len() as f32 / applying.len() as f32
        };

        let transcripts: Vec<String> = members
            .iter()
            .map(|m| m.transcript_id())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let instance_count = transcripts.len();

        let mut missing_signals = Vec::new();
        if !applying.iter().any(|m| m.outcome.tests_passed) {
            missing_signals.push(MissingSignal::NoPassingTests);
        }
        if !applying.iter().any(|m| m.outcome.user_confirmed) {
            missing_signals.push(MissingSignal::NoUserConfirmation);
        }
        if instance_count < self.config.min_instances {
            missing_signals.push(MissingSignal::TooFewInstances {
                have: instance_count,
                need: self.config.min_instances,
            });
        }
        if !counterexamples.is_empty() {
            missing_signals.push(MissingSignal::ConflictingOutcomes);
        }

        let member_ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        let mut id_parts = vec![representative.fingerprint.clone()];
        id_parts.extend(member_ids.iter().cloned());
        let id = hash_parts(&id_parts)[..16].to_string();

        let taint = TaintSet::union_all(members.iter().map(|m| &m.taint));
        let applying_phrases = applying.iter().map(|m| m.solution_phrase.clone()).collect();

        Ok(Draft {
            candidate: GeneralPattern {
                id,
                principle: String::new(),
                signature: representative.signature.clone(),
                conditions,
                solution_phrase: representative.solution_phrase.clone(),
                scores: self.score(coverage, predictive_power, 0.0),
                counterexamples,
                instance_count,
                transcripts,
                members: member_ids,
                supporting,
                taint,
                missing_signals,
                critique_notes: Vec::new(),
            },
            applying_phrases,
        })
    }

    /// Mean pairwise similarity of the applying members' fixes.
    async fn coherence(&self, phrases: &[String]) -> Result<f32> {
        if phrases.len() < 2 {
            return Ok(1.0);
        }
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..phrases.len() {
            for j in (i + 1)..phrases.len() {
                total += self.similarity.similarity(&phrases[i], &phrases[j]).await?;
                pairs += 1;
            }
        }
        Ok((total / pairs as f32).clamp(0.0, 1.0))
    }

    pub fn score(&self, coverage: f32, predictive_power: f32, coherence: f32) -> ConfidenceScores {
        let c = &self.config;
        let specificity = if coverage > c.platitude_coverage && coherence < c.platitude_coherence {
            c.platitude_specificity
        } else {
            1.0 - c.specificity_slope * coverage
        };
        let confidence = c.coverage_weight * coverage
            + c.predictive_weight * predictive_power
            + c.coherence_weight * coherence
            + c.specificity_weight * specificity;

        ConfidenceScores {
            coverage,
            predictive_power,
            coherence,
            specificity,
            confidence,
        }
    }

    fn decide(&self, candidate: GeneralPattern, flagged: bool) -> Verdict {
        let confident = candidate.confidence() >= self.config.promote_threshold;
        let enough = candidate.instance_count >= self.config.min_instances;

        if confident && enough && !flagged {
            info!(
                candidate_id = %candidate.id,
                confidence = candidate.confidence(),
                instances = candidate.instance_count,
                "Candidate promoted"
            );
            return Verdict::Promote(candidate);
        }

        let reason = if !confident && !candidate.counterexamples.is_empty() {
            UncertaintyReason::ConflictingEvidence
        } else if !enough {
            UncertaintyReason::InsufficientInstances
        } else if !confident {
            UncertaintyReason::LowConfidence
        } else {
            UncertaintyReason::OvergeneralizationFlagged
        };

        debug!(
            candidate_id = %candidate.id,
            confidence = candidate.confidence(),
            instances = candidate.instance_count,
            reason = %reason,
            "Candidate deferred"
        );
        Verdict::Defer { candidate, reason }
    }

    fn drop_for_safety(
        &self,
        candidate: GeneralPattern,
        violations: Vec<SafetyViolation>,
    ) -> Verdict {
        warn!(
            candidate_id = %candidate.id,
            taint = %candidate.taint,
            violations = violations.len(),
            "Candidate dropped for safety"
        );
        Verdict::DroppedForSafety {
            candidate_id: candidate.id,
            violations,
        }
    }
}

fn counterexample(member: &StructuralPattern, kind: CounterexampleKind) -> Counterexample {
    let (confidence, note) = match kind {
        CounterexampleKind::NotApplicable => (
            0.4,
            format!("{} is outside the rule's conditions", member.signature),
        ),
        CounterexampleKind::ShapeMismatch if member.outcome.hint == OutcomeHint::Success => (
            0.85,
            format!(
                "{} resolved the same problem",
                member.classifier.solution_shape
            ),
        ),
        CounterexampleKind::ShapeMismatch => (
            0.6,
            format!(
                "{} was tried for the same problem",
                member.classifier.solution_shape
            ),
        ),
        CounterexampleKind::OutcomeFailure => (0.9, "the fix did not hold".to_string()),
    };
    Counterexample {
        pattern_id: member.id.clone(),
        fragment: member.fragment.clone(),
        kind,
        confidence,
        note,
    }
}
