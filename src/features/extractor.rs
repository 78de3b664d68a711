use std::collections::BTreeMap;

use tracing::debug;

use super::types::{Classifier, Domain, OutcomeHint, OutcomeSignals, StructuralPattern};
use super::vocabulary::{
    CONFIRMATION_CUES, DOMAIN_CUES, FAILURE_CUES, FILE_TYPE_DOMAINS, FIX_OBJECTS, FIX_VERBS,
    PROBLEM_CUES, TEST_SUCCESS_CUES,
};
use crate::config::ExtractionConfig;
use crate::error::{MinerError, Result};
use crate::evidence::{Role, TranscriptFragment};
use crate::utils::{extract_keywords, hash_parts, is_function_word};

/// Patterns and rejects from one transcript.
#[derive(Debug, Default)]
pub struct Extraction {
    pub patterns: Vec<StructuralPattern>,
    pub malformed: Vec<MinerError>,
    /// Fragments that carry no fix (problem reports, tool output, chatter).
    pub skipped: usize,
}

/// Neighbouring fragments available to one extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct Neighbours<'a> {
    /// Nearest preceding user fragment.
    pub problem: Option<&'a TranscriptFragment>,
    /// Fragments after the fix, up to the next assistant turn.
    pub following: &'a [TranscriptFragment],
}

/// Deterministic fragment → pattern extraction. No I/O, no state.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: ExtractionConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract every fix pattern from a transcript's redacted fragments.
    pub fn extract_transcript(&self, fragments: &[TranscriptFragment]) -> Extraction {
        let mut extraction = Extraction::default();

        for (pos, fragment) in fragments.iter().enumerate() {
            let problem = fragments[..pos].iter().rev().find(|f| f.role == Role::User);
            let rest = &fragments[pos + 1..];
            let end = rest
                .iter()
                .position(|f| f.role == Role::Assistant)
                .unwrap_or(rest.len());
            let neighbours = Neighbours {
                problem,
                following: &rest[..end],
            };

            match self.extract(fragment, neighbours) {
                Ok(Some(pattern)) => extraction.patterns.push(pattern),
                Ok(None) => extraction.skipped += 1,
                Err(e) => extraction.malformed.push(e),
            }
        }

        debug!(
            patterns = extraction.patterns.len(),
            skipped = extraction.skipped,
            malformed = extraction.malformed.len(),
            "Extracted structural patterns"
        );
        extraction
    }

    /// Extract a pattern from one fragment. `Ok(None)` when the fragment
    /// does not describe a fix.
    pub fn extract(
        &self,
        fragment: &TranscriptFragment,
        neighbours: Neighbours<'_>,
    ) -> Result<Option<StructuralPattern>> {
        let text = fragment.text.trim();
        if text.is_empty() {
            return Err(MinerError::MalformedFragment {
                source_id: fragment.fragment_id(),
                reason: "empty text".into(),
            });
        }
        if fragment.range.byte_end < fragment.range.byte_start {
            return Err(MinerError::MalformedFragment {
                source_id: fragment.fragment_id(),
                reason: format!("inverted range {}", fragment.range),
            });
        }
        if fragment.role != Role::Assistant || text.chars().count() < self.config.min_fragment_chars
        {
            return Ok(None);
        }

        let lower = text.to_lowercase();
        let Some((sentence, action)) = solution_sentence(&lower) else {
            return Ok(None);
        };

        let mut context = Vec::new();
        let mut taint = fragment.taint.clone();

        // Problem cues: own text first, then the user's report.
        let mut problem_class = find_cue(&lower, PROBLEM_CUES).map(str::to_string);
        let mut domain = domain_from_text(&lower);
        if let Some(problem) = neighbours.problem {
            let problem_lower = problem.text.to_lowercase();
            let mut used = false;
            if problem_class.is_none()
                && let Some(class) = find_cue(&problem_lower, PROBLEM_CUES)
            {
                problem_class = Some(class.to_string());
                used = true;
            }
            if domain.is_none()
                && let Some(d) = domain_from_text(&problem_lower)
            {
                domain = Some(d);
                used = true;
            }
            if used {
                context.push(problem.fragment_ref());
                taint = taint.union(&problem.taint);
            }
        }
        let domain = domain
            .or_else(|| domain_from_file_type(fragment.context.file_type.as_deref()))
            .unwrap_or(Domain::General);
        let problem_class = problem_class.unwrap_or_else(|| dominant_noun(&lower));

        let object = find_cue(sentence, FIX_OBJECTS).unwrap_or("code");
        let solution_shape = format!("{}-{}", action, object);
        let solution_phrase = normalize_phrase(sentence);

        // Outcome cues: own text, then whatever followed the fix.
        let mut outcome = outcome_from_text(&lower, Role::Assistant);
        for next in neighbours.following {
            let next_lower = next.text.to_lowercase();
            let found = outcome_from_text(&next_lower, next.role);
            if found == OutcomeSignals::default() {
                continue;
            }
            context.push(next.fragment_ref());
            taint = taint.union(&next.taint);
            outcome.tests_passed |= found.tests_passed;
            outcome.user_confirmed |= found.user_confirmed;
            if found.hint == OutcomeHint::Failure {
                outcome.hint = OutcomeHint::Failure;
            }
        }
        if outcome.hint != OutcomeHint::Failure && (outcome.tests_passed || outcome.user_confirmed)
        {
            outcome.hint = OutcomeHint::Success;
        }

        let classifier = Classifier {
            domain,
            problem_class,
            solution_shape,
        };
        let fingerprint = hash_parts(&[
            classifier.domain.as_str(),
            classifier.problem_class.as_str(),
            classifier.solution_shape.as_str(),
            solution_phrase.as_str(),
        ]);
        let fragment_ref = fragment.fragment_ref();
        let id = hash_parts(&[fingerprint.clone(), fragment_ref.to_string()])[..16].to_string();

        let search_terms = phrase_terms(&solution_phrase, self.config.signature_keywords);

        Ok(Some(StructuralPattern {
            id,
            fingerprint,
            signature: classifier.to_string(),
            classifier,
            search_terms,
            keywords: extract_keywords(text),
            solution_phrase,
            excerpt: text.to_string(),
            outcome,
            file_type: fragment.context.file_type.clone(),
            fragment: fragment_ref,
            context,
            taint,
        }))
    }
}

pub(super) fn fix_action(token: &str) -> Option<&'static str> {
    FIX_VERBS
        .iter()
        .find(|(_, forms)| forms.contains(&token))
        .map(|(action, _)| *action)
}

/// First sentence that contains a fix verb, with the verb's action.
fn solution_sentence(lower: &str) -> Option<(&str, &'static str)> {
    lower
        .split(['\n', '!', '?'])
        .flat_map(|chunk| chunk.split(". "))
        .find_map(|sentence| {
            sentence
                .split(|c: char| !c.is_alphanumeric())
                .find_map(fix_action)
                .map(|action| (sentence, action))
        })
}

fn find_cue<'a>(lower: &str, table: &'a [(&'a str, &[&str])]) -> Option<&'a str> {
    table
        .iter()
        .find(|(_, cues)| cues.iter().any(|cue| lower.contains(cue)))
        .map(|(name, _)| *name)
}

fn domain_from_text(lower: &str) -> Option<Domain> {
    DOMAIN_CUES
        .iter()
        .find(|(_, cues)| cues.iter().any(|cue| lower.contains(cue)))
        .map(|(domain, _)| *domain)
}

fn domain_from_file_type(file_type: Option<&str>) -> Option<Domain> {
    let ext = file_type?.trim_start_matches('.').to_lowercase();
    FILE_TYPE_DOMAINS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, domain)| *domain)
}

fn outcome_from_text(lower: &str, role: Role) -> OutcomeSignals {
    if FAILURE_CUES.iter().any(|cue| lower.contains(cue)) {
        return OutcomeSignals {
            hint: OutcomeHint::Failure,
            ..Default::default()
        };
    }
    let tests_passed = TEST_SUCCESS_CUES.iter().any(|cue| lower.contains(cue));
    let user_confirmed =
        role == Role::User && CONFIRMATION_CUES.iter().any(|cue| lower.contains(cue));
    OutcomeSignals {
        hint: OutcomeHint::Unknown,
        tests_passed,
        user_confirmed,
    }
}

/// Most frequent content token; ties go to the lexicographically first.
fn dominant_noun(lower: &str) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for token in lower.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_') {
        let token = token.trim_matches('-');
        if token.chars().count() < 3
            || is_function_word(token)
            || fix_action(token).is_some()
            || token.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(token, _)| token.to_string())
        .unwrap_or_else(|| "unspecified".to_string())
}

/// Lowercase, quote-free, function-word-free rendering of a sentence.
fn normalize_phrase(sentence: &str) -> String {
    sentence
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(c, '"' | '\'' | '`'))
                .collect::<String>()
        })
        .map(|word| {
            word.trim_matches(|c: char| matches!(c, ',' | '.' | ';' | ':' | '(' | ')'))
                .to_string()
        })
        .filter(|word| !word.is_empty() && !is_function_word(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn phrase_terms(phrase: &str, limit: usize) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in phrase.split_whitespace() {
        if fix_action(word).is_none() && !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
        if terms.len() == limit {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::Transcript;
    use crate::redaction::{Redactor, TaintLabel};

    fn aria_transcript(id: &str) -> Transcript {
        Transcript::new(id)
            .with_message(
                Role::User,
                "The decorative SVG in the header is announced by screen readers",
            )
            .with_file_message(
                Role::Assistant,
                "Added aria-hidden=\"true\" to the decorative SVG so screen readers skip it.",
                "tsx",
            )
            .with_message(Role::Tool, "Tests passed: 12, 0 failed")
            .with_message(Role::User, "Confirmed, works now. Thanks!")
    }

    #[test]
    fn test_extracts_fix_with_classifier() {
        let extraction =
            FeatureExtractor::default().extract_transcript(&aria_transcript("t1").fragments());
        assert_eq!(extraction.patterns.len(), 1);
        assert_eq!(extraction.skipped, 3);
        assert!(extraction.malformed.is_empty());

        let pattern = &extraction.patterns[0];
        assert_eq!(pattern.classifier.domain, Domain::Accessibility);
        assert_eq!(pattern.classifier.problem_class, "missing-attribute");
        assert_eq!(pattern.classifier.solution_shape, "add-attribute");
        assert_eq!(pattern.signature, "accessibility/missing-attribute/add-attribute");
        assert!(pattern.solution_phrase.contains("aria-hidden=true"));
        assert!(!pattern.solution_phrase.contains(" the "));
        assert_eq!(pattern.file_type.as_deref(), Some("tsx"));
    }

    #[test]
    fn test_outcome_from_following_fragments() {
        let extraction =
            FeatureExtractor::default().extract_transcript(&aria_transcript("t1").fragments());
        let pattern = &extraction.patterns[0];
        assert_eq!(pattern.outcome.hint, OutcomeHint::Success);
        assert!(pattern.outcome.tests_passed);
        assert!(pattern.outcome.user_confirmed);
        // Tool output and user confirmation contributed.
        assert_eq!(pattern.context.len(), 2);
        assert!(pattern.taint.contains(TaintLabel::ToolOutput));
        assert!(pattern.taint.contains(TaintLabel::UserText));
        assert!(pattern.taint.contains(TaintLabel::AssistantGenerated));
    }

    #[test]
    fn test_failure_cue_wins() {
        let transcript = Transcript::new("t1")
            .with_message(Role::User, "Build fails: cannot find module 'lodash/fp'")
            .with_message(Role::Assistant, "Pinned lodash to 4.17.20 in package.json")
            .with_message(Role::User, "Still failing, the error is the same");
        let extraction = FeatureExtractor::default().extract_transcript(&transcript.fragments());
        let pattern = &extraction.patterns[0];
        assert_eq!(pattern.outcome.hint, OutcomeHint::Failure);
        assert_eq!(pattern.classifier.problem_class, "missing-dependency");
        assert_eq!(pattern.classifier.solution_shape, "pin-dependency");
        assert_eq!(pattern.classifier.domain, Domain::Dependency);
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_content_based() {
        let extractor = FeatureExtractor::default();
        let a = extractor.extract_transcript(&aria_transcript("t1").fragments());
        let b = extractor.extract_transcript(&aria_transcript("t1").fragments());
        let c = extractor.extract_transcript(&aria_transcript("t2").fragments());

        assert_eq!(a.patterns, b.patterns);
        assert_eq!(a.patterns[0].fingerprint, c.patterns[0].fingerprint);
        assert_ne!(a.patterns[0].id, c.patterns[0].id);
    }

    #[test]
    fn test_empty_fragment_is_malformed() {
        let transcript = Transcript::new("t1").with_message(Role::Assistant, "   ");
        let extraction = FeatureExtractor::default().extract_transcript(&transcript.fragments());
        assert!(extraction.patterns.is_empty());
        assert!(matches!(
            extraction.malformed[0],
            MinerError::MalformedFragment { .. }
        ));
    }

    #[test]
    fn test_non_fix_fragments_skipped() {
        let transcript = Transcript::new("t1")
            .with_message(Role::Assistant, "Looking at the component tree now")
            .with_message(Role::Tool, "src/components/Icon.tsx");
        let extraction = FeatureExtractor::default().extract_transcript(&transcript.fragments());
        assert!(extraction.patterns.is_empty());
        assert_eq!(extraction.skipped, 2);
    }

    #[test]
    fn test_redacted_text_stays_redacted() {
        let transcript = Transcript::new("t1").with_message(
            Role::Assistant,
            "Added api_key=abcd1234efgh5678ijkl to the config file",
        );
        let redacted = Redactor::default().redact_transcript(&transcript);
        let extraction = FeatureExtractor::default().extract_transcript(&redacted.fragments);
        let pattern = &extraction.patterns[0];
        assert!(!pattern.excerpt.contains("abcd1234efgh5678ijkl"));
        assert!(pattern.taint.contains(TaintLabel::ContainsSecret));
    }

    #[test]
    fn test_dominant_noun_fallback() {
        assert_eq!(dominant_noun("wrapped the widget in a widget frame"), "widget");
        assert_eq!(dominant_noun("added it"), "unspecified");
    }
}
