use std::time::Duration;

use thiserror::Error;

use crate::config::RetryConfig;

/// Failure reported by an external collaborator (evidence store, knowledge base).
#[derive(Debug, Clone)]
pub enum StoreFailure {
    Timeout { operation: String, duration_ms: u64 },
    Unavailable(String),
    Busy(String),
    NotFound(String),
    Corrupt(String),
    Other(String),
}

impl StoreFailure {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Unavailable(_) | Self::Busy(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Backoff delay before the given (1-based) retry attempt.
    pub fn backoff(&self, attempt: u32, config: &RetryConfig) -> Duration {
        if self.is_permanent() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let delay = config.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(config.max_delay_ms))
    }

    pub fn max_retries(&self, config: &RetryConfig) -> u32 {
        if self.is_transient() {
            config.max_retries
        } else {
            0
        }
    }

    /// Classify a free-form error message from a store backend.
    /// Only unambiguous markers are recognized; everything else is `Other`.
    pub fn from_message(msg: &str) -> Self {
        let lower = msg.to_lowercase();
        if lower.contains("database is locked") || lower.contains("busy") {
            return Self::Busy(msg.to_string());
        }
        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::Timeout {
                operation: "store".to_string(),
                duration_ms: 0,
            };
        }
        if lower.contains("connection refused")
            || lower.contains("unavailable")
            || lower.contains("503")
        {
            return Self::Unavailable(msg.to_string());
        }
        if lower.contains("not found") {
            return Self::NotFound(msg.to_string());
        }
        if lower.contains("malformed") || lower.contains("corrupt") {
            return Self::Corrupt(msg.to_string());
        }
        Self::Other(msg.to_string())
    }
}

impl std::fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                operation,
                duration_ms,
            } => write!(f, "Timeout after {}ms: {}", duration_ms, operation),
            Self::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::Busy(msg) => write!(f, "Store busy: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Corrupt(msg) => write!(f, "Corrupt data: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StoreFailure {}

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("Malformed fragment {source_id}: {reason}")]
    MalformedFragment { source_id: String, reason: String },

    #[error("Insufficient evidence: have {have} instances, need {need}")]
    InsufficientEvidence { have: usize, need: usize },

    #[error("Confidence {confidence:.2} below threshold {threshold:.2}")]
    ConfidenceTooLow { confidence: f32, threshold: f32 },

    #[error("Taint violation for candidate {candidate_id}: {labels}")]
    TaintViolation {
        candidate_id: String,
        labels: String,
    },

    #[error("Evidence store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreFailure,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreFailure),

    #[error("Transcript not found: {0}")]
    TranscriptNotFound(String),

    #[error("Uncertainty item not found: {0}")]
    UncertaintyNotFound(String),

    #[error("Invalid uncertainty transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl MinerError {
    /// Errors that end a run; everything else is handled per item.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::KnowledgeBase(_)
                | Self::Checkpoint(_)
                | Self::Cancelled { .. }
                | Self::Io(_)
                | Self::Sqlite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreFailure::from_message("database is locked").is_transient());
        assert!(StoreFailure::from_message("connection refused").is_transient());
        assert!(StoreFailure::from_message("request timed out").is_transient());
        assert!(StoreFailure::from_message("transcript not found").is_permanent());
        assert!(StoreFailure::from_message("weird").is_permanent());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        let failure = StoreFailure::Unavailable("down".into());
        assert_eq!(failure.backoff(1, &config), Duration::from_millis(100));
        assert_eq!(failure.backoff(2, &config), Duration::from_millis(200));
        assert_eq!(failure.backoff(3, &config), Duration::from_millis(400));
        assert_eq!(failure.backoff(10, &config), Duration::from_millis(1000));
        assert_eq!(failure.max_retries(&config), 5);

        let permanent = StoreFailure::NotFound("x".into());
        assert_eq!(permanent.backoff(1, &config), Duration::ZERO);
        assert_eq!(permanent.max_retries(&config), 0);
    }

    #[test]
    fn test_fatal_for_run() {
        let err = MinerError::StoreUnavailable {
            attempts: 3,
            source: StoreFailure::Unavailable("down".into()),
        };
        assert!(err.is_fatal_for_run());
        assert!(
            !MinerError::MalformedFragment {
                source_id: "t1".into(),
                reason: "empty".into()
            }
            .is_fatal_for_run()
        );
    }
}
