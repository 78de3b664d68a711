use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::scanner::{Finding, FindingKind};
use crate::error::{MinerError, Result};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn assess(findings: &[Finding], injection_markers: usize) -> Self {
        let base = findings
            .iter()
            .map(|f| match f.kind {
                FindingKind::Secret if f.detector == "private_key" => RiskLevel::Critical,
                FindingKind::Secret | FindingKind::Token => RiskLevel::High,
                FindingKind::HighEntropy => RiskLevel::Medium,
                FindingKind::Pii => RiskLevel::Low,
            })
            .max()
            .unwrap_or(RiskLevel::None);

        let secrets = findings
            .iter()
            .filter(|f| matches!(f.kind, FindingKind::Secret | FindingKind::Token))
            .count();
        let escalated = if secrets >= 3 {
            RiskLevel::Critical
        } else {
            base
        };

        if injection_markers > 0 {
            escalated.max(RiskLevel::Medium)
        } else {
            escalated
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Result of redacting a single text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub findings: Vec<Finding>,
    pub injection_markers: Vec<String>,
    pub redacted_token_count: usize,
    pub risk: RiskLevel,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.injection_markers.is_empty()
    }
}

/// Per-finding entry of the transcript audit, located by message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub message_index: usize,
    #[serde(flatten)]
    pub finding: Finding,
}

/// Immutable audit artifact emitted once per processed transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionReport {
    pub transcript_id: String,
    pub findings: Vec<AuditFinding>,
    pub injection_markers: Vec<String>,
    pub redacted_token_count: usize,
    pub risk: RiskLevel,
    pub created_at: DateTime<Utc>,
}

impl RedactionReport {
    pub fn count_of(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.finding.kind == kind).count()
    }
}

/// Append-only JSON Lines log of redaction reports.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, report: &RedactionReport) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(report)
            .map_err(|e| MinerError::Serialization(format!("redaction report: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;

        debug!(
            transcript_id = %report.transcript_id,
            risk = %report.risk,
            redacted = report.redacted_token_count,
            "Appended redaction report"
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<Vec<RedactionReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).await?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<RedactionReport>(line) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid audit line");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finding(kind: FindingKind, detector: &str) -> Finding {
        Finding {
            kind,
            detector: detector.into(),
            start: 0,
            end: 10,
            confidence: 0.9,
            masked_preview: "[REDACTED]".into(),
        }
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::assess(&[], 0), RiskLevel::None);
        assert_eq!(RiskLevel::assess(&[], 1), RiskLevel::Medium);
        assert_eq!(
            RiskLevel::assess(&[finding(FindingKind::Pii, "email")], 0),
            RiskLevel::Low
        );
        assert_eq!(
            RiskLevel::assess(&[finding(FindingKind::Token, "jwt")], 0),
            RiskLevel::High
        );
        assert_eq!(
            RiskLevel::assess(&[finding(FindingKind::Secret, "private_key")], 0),
            RiskLevel::Critical
        );
        let many = vec![finding(FindingKind::Secret, "api_key"); 3];
        assert_eq!(RiskLevel::assess(&many, 0), RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_audit_log_append_and_load() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("audit").join("redaction.jsonl"));

        for id in ["t1", "t2"] {
            log.append(&RedactionReport {
                transcript_id: id.into(),
                findings: vec![AuditFinding {
                    message_index: 0,
                    finding: finding(FindingKind::Secret, "api_key"),
                }],
                injection_markers: vec![],
                redacted_token_count: 1,
                risk: RiskLevel::High,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let loaded = log.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].transcript_id, "t2");
        assert_eq!(loaded[0].count_of(FindingKind::Secret), 1);
    }
}
