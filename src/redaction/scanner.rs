use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RedactionConfig;

/// Finding categories reported by the redactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Secret,
    Token,
    Pii,
    HighEntropy,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret => write!(f, "secret"),
            Self::Token => write!(f, "token"),
            Self::Pii => write!(f, "pii"),
            Self::HighEntropy => write!(f, "high_entropy"),
        }
    }
}

/// A detected sensitive span. The raw matched text is never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub detector: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
    pub masked_preview: String,
}

impl Finding {
    fn new(
        kind: FindingKind,
        detector: &str,
        start: usize,
        end: usize,
        text: &str,
        confidence: f32,
    ) -> Self {
        Self {
            kind,
            detector: detector.to_string(),
            start,
            end,
            confidence,
            masked_preview: mask(text),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Finding) -> bool {
        self.start < other.end && other.start < self.end
    }
}

fn mask(text: &str) -> String {
    let len = text.chars().count();
    if len <= 8 {
        "[REDACTED]".to_string()
    } else {
        let prefix: String = text.chars().take(3).collect();
        format!("{}...({} chars)", prefix, len)
    }
}

struct Detector {
    name: &'static str,
    kind: FindingKind,
    regex: Regex,
    confidence: f32,
}

impl Detector {
    fn new(name: &'static str, kind: FindingKind, pattern: &str, confidence: f32) -> Self {
        Self {
            name,
            kind,
            regex: Regex::new(pattern).unwrap(),
            confidence,
        }
    }
}

static SECRET_DETECTORS: OnceLock<Vec<Detector>> = OnceLock::new();
static PII_DETECTORS: OnceLock<Vec<Detector>> = OnceLock::new();
static INJECTION_PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

/// Capture group 1 (when present) is the sensitive value; otherwise the whole match.
fn secret_detectors() -> &'static [Detector] {
    SECRET_DETECTORS.get_or_init(|| {
        use FindingKind::{Secret, Token};
        vec![
            Detector::new(
                "aws_access_key",
                Secret,
                r"(?:^|[^A-Z0-9])((?:AKIA|ABIA|ACCA|ASIA)[0-9A-Z]{16})(?:[^A-Z0-9]|$)",
                0.95,
            ),
            Detector::new(
                "aws_secret_key",
                Secret,
                r#"(?i)(?:aws_?secret(?:_access)?_?key|secret_?key)['"]?\s*[:=]\s*['"]?([A-Za-z0-9/+=]{40})"#,
                0.90,
            ),
            Detector::new(
                "github_token",
                Token,
                r"(?:ghp|gho|ghs|ghr|ghu)_[A-Za-z0-9]{36}|github_pat_[A-Za-z0-9]{22}_[A-Za-z0-9]{59}",
                0.98,
            ),
            Detector::new("openai_key", Secret, r"sk-(?:proj-)?[A-Za-z0-9_-]{20,}", 0.95),
            Detector::new(
                "jwt",
                Token,
                r"eyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
                0.95,
            ),
            Detector::new(
                "bearer",
                Token,
                r"(?i)bearer\s+([A-Za-z0-9_\-.~+/]{16,}=*)",
                0.85,
            ),
            Detector::new(
                "slack_token",
                Token,
                r"xox[baprs]-[0-9]{10,13}-[0-9]{10,13}[A-Za-z0-9-]*",
                0.95,
            ),
            Detector::new(
                "api_key",
                Secret,
                r#"(?i)api[_-]?key['"]?\s*[:=]\s*['"]?([A-Za-z0-9_\-]{16,64})"#,
                0.80,
            ),
            Detector::new(
                "database_url",
                Secret,
                r"(?i)(?:postgres(?:ql)?|mysql|mongodb(?:\+srv)?|redis|amqp)://[^:\s]+:([^@\s]+)@",
                0.90,
            ),
            Detector::new(
                "private_key",
                Secret,
                r"-----BEGIN (?:RSA |DSA |EC |OPENSSH |PGP |ENCRYPTED )?PRIVATE KEY(?: BLOCK)?-----",
                0.99,
            ),
            Detector::new(
                "password",
                Secret,
                r#"(?i)(?:password|passwd|pwd)['"]?\s*[:=]\s*['"]([^'"\s]{8,64})['"]"#,
                0.70,
            ),
            Detector::new(
                "generic_secret",
                Secret,
                r#"(?i)(?:secret|token|credential)['"]?\s*[:=]\s*['"]([^'"\s]{16,64})['"]"#,
                0.60,
            ),
        ]
    })
}

fn pii_detectors() -> &'static [Detector] {
    PII_DETECTORS.get_or_init(|| {
        vec![
            Detector::new(
                "email",
                FindingKind::Pii,
                r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
                0.90,
            ),
            Detector::new(
                "phone",
                FindingKind::Pii,
                r"(?:\+\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b",
                0.70,
            ),
            Detector::new("ssn", FindingKind::Pii, r"\b\d{3}-\d{2}-\d{4}\b", 0.85),
        ]
    })
}

fn injection_patterns() -> &'static [(&'static str, Regex)] {
    INJECTION_PATTERNS.get_or_init(|| {
        [
            (
                "ignore_instructions",
                r"(?i)ignore (?:all |any )?(?:previous|prior|above) instructions",
            ),
            (
                "disregard_instructions",
                r"(?i)disregard (?:all |any )?(?:previous|prior|above) instructions",
            ),
            ("reveal_system_prompt", r"(?i)reveal (?:the |your )?system prompt"),
            ("system_prompt_override", r"(?i)(?:new|override) system prompt"),
            ("exfiltrate", r"(?i)\bexfiltrate\b"),
            ("leak_credentials", r"(?i)leak (?:the )?(?:secrets|keys|tokens|credentials)"),
            ("role_hijack", r"(?i)you are now (?:in )?(?:developer|dan|jailbreak) mode"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
        .collect()
    })
}

/// Shannon entropy in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    let len = s.chars().count();
    if len == 0 {
        return 0.0;
    }
    let mut counts = std::collections::BTreeMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len as f64;
            -p * p.log2()
        })
        .sum()
}

/// Pattern and entropy based scanner.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: RedactionConfig,
}

impl Scanner {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    /// Sensitive spans in `text`, sorted by position, overlaps removed
    /// in favor of the earlier (then longer) span.
    pub fn scan(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        for detector in secret_detectors() {
            collect(detector, text, &mut findings);
        }
        if self.config.detect_pii {
            for detector in pii_detectors() {
                collect(detector, text, &mut findings);
            }
        }
        self.collect_entropy(text, &mut findings);

        findings.sort_by(|a, b| a.start.cmp(&b.start).then(b.len().cmp(&a.len())));
        let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
        for finding in findings {
            match merged.last_mut() {
                Some(last) if last.overlaps(&finding) => {
                    if finding.end > last.end {
                        last.end = finding.end;
                    }
                }
                _ => merged.push(finding),
            }
        }
        merged
    }

    /// Names of injection markers present in `text`.
    pub fn injection_markers(&self, text: &str) -> Vec<String> {
        if !self.config.detect_injection {
            return Vec::new();
        }
        injection_patterns()
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn collect_entropy(&self, text: &str, findings: &mut Vec<Finding>) {
        let mut offset = 0;
        for token in text.split_inclusive(|c: char| {
            c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '=' | ',' | ';' | '(' | ')')
        }) {
            let start = offset;
            offset += token.len();

            let trimmed = token.trim_end_matches(|c: char| {
                c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '=' | ',' | ';' | '(' | ')')
            });
            if trimmed.chars().count() < self.config.min_entropy_len {
                continue;
            }
            // Paths and URLs are long but not secret.
            if trimmed.contains('/') && !trimmed.contains('+') {
                continue;
            }
            let has_digit = trimmed.chars().any(|c| c.is_ascii_digit());
            let has_alpha = trimmed.chars().any(|c| c.is_ascii_alphabetic());
            if !(has_digit && has_alpha) {
                continue;
            }
            if shannon_entropy(trimmed) >= self.config.entropy_threshold {
                findings.push(Finding::new(
                    FindingKind::HighEntropy,
                    "entropy",
                    start,
                    start + trimmed.len(),
                    trimmed,
                    0.6,
                ));
            }
        }
    }
}

fn collect(detector: &Detector, text: &str, findings: &mut Vec<Finding>) {
    for caps in detector.regex.captures_iter(text) {
        let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
            continue;
        };
        findings.push(Finding::new(
            detector.kind,
            detector.name,
            m.start(),
            m.end(),
            m.as_str(),
            detector.confidence,
        ));
    }
}
