//! Redaction and taint tracking.
//!
//! Scrubs sensitive content from transcript text before anything downstream
//! sees it, and labels every fragment with a taint set describing where its
//! text came from and what was found in it.
//!
//! - `Redactor`: `redact(text) -> (clean text, ScanReport)`
//! - `TaintSet`, `TaintPolicy`: provenance labels and the two safety predicates
//! - `RedactionReport`, `AuditLog`: one immutable audit artifact per transcript

mod report;
mod scanner;
mod taint;

use chrono::Utc;
use tracing::debug;

pub use report::{AuditFinding, AuditLog, RedactionReport, RiskLevel, ScanReport};
pub use scanner::{Finding, FindingKind, Scanner, shannon_entropy};
pub use taint::{SafetyPredicate, TaintLabel, TaintPolicy, TaintSet};

use crate::config::RedactionConfig;
use crate::evidence::{Transcript, TranscriptFragment};

/// Fragments of one transcript after redaction, with the audit report.
#[derive(Debug, Clone)]
pub struct RedactedTranscript {
    pub fragments: Vec<TranscriptFragment>,
    pub report: RedactionReport,
}

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    scanner: Scanner,
}

impl Redactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self {
            scanner: Scanner::new(config),
        }
    }

    /// Replace every sensitive span with `[REDACTED:<kind>]`.
    pub fn redact(&self, text: &str) -> (String, ScanReport) {
        let findings = self.scanner.scan(text);
        let injection_markers = self.scanner.injection_markers(text);

        let mut clean = String::with_capacity(text.len());
        let mut cursor = 0;
        for finding in &findings {
            clean.push_str(&text[cursor..finding.start]);
            clean.push_str(&format!("[REDACTED:{}]", finding.kind));
            cursor = finding.end;
        }
        clean.push_str(&text[cursor..]);

        let risk = RiskLevel::assess(&findings, injection_markers.len());
        let report = ScanReport {
            redacted_token_count: findings.len(),
            findings,
            injection_markers,
            risk,
        };
        (clean, report)
    }

    /// Content taint implied by a scan.
    pub fn taint_for(report: &ScanReport) -> TaintSet {
        let mut taint = TaintSet::new();
        for finding in &report.findings {
            match finding.kind {
                FindingKind::Secret | FindingKind::Token | FindingKind::HighEntropy => {
                    taint.insert(TaintLabel::ContainsSecret)
                }
                FindingKind::Pii => taint.insert(TaintLabel::ContainsPii),
            }
        }
        if !report.injection_markers.is_empty() {
            taint.insert(TaintLabel::ContainsInjection);
        }
        taint
    }

    /// Redact one fragment. The result's taint is the union of the input
    /// taint and whatever the scan found.
    pub fn redact_fragment(
        &self,
        fragment: &TranscriptFragment,
    ) -> (TranscriptFragment, ScanReport) {
        let (clean, report) = self.redact(&fragment.text);
        let taint = fragment.taint.union(&Self::taint_for(&report));
        let redacted = TranscriptFragment {
            text: clean,
            taint,
            ..fragment.clone()
        };
        (redacted, report)
    }

    pub fn redact_transcript(&self, transcript: &Transcript) -> RedactedTranscript {
        let mut fragments = Vec::new();
        let mut findings = Vec::new();
        let mut injection_markers: Vec<String> = Vec::new();
        let mut redacted_token_count = 0;
        let mut risk = RiskLevel::None;

        for fragment in transcript.fragments() {
            let (redacted, report) = self.redact_fragment(&fragment);
            redacted_token_count += report.redacted_token_count;
            risk = risk.max(report.risk);
            for marker in report.injection_markers {
                if !injection_markers.contains(&marker) {
                    injection_markers.push(marker);
                }
            }
            findings.extend(report.findings.into_iter().map(|finding| AuditFinding {
                message_index: fragment.range.message_index,
                finding,
            }));
            fragments.push(redacted);
        }

        debug!(
            transcript_id = %transcript.id,
            fragments = fragments.len(),
            redacted = redacted_token_count,
            risk = %risk,
            "Transcript redacted"
        );

        RedactedTranscript {
            fragments,
            report: RedactionReport {
                transcript_id: transcript.id.clone(),
                findings,
                injection_markers,
                redacted_token_count,
                risk,
                created_at: Utc::now(),
            },
        }
    }
}
