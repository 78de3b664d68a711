//! Session quality gate.
//!
//! Scores a transcript's redacted fragments before extraction. Abandoned,
//! thrashing or unresolved sessions score low and are not mined.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extractor::fix_action;
use super::vocabulary::{
    ABANDON_CUES, BACKTRACK_CUES, CONFIRMATION_CUES, RESOLUTION_CUES, TEST_SUCCESS_CUES,
};
use crate::config::QualityConfig;
use crate::evidence::{Role, TranscriptFragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySignal {
    FixApplied,
    TestsPassed,
    ClearResolution,
    UserConfirmed,
    Backtracking,
    Abandoned,
    TooLong,
}

impl QualitySignal {
    pub fn is_penalty(&self) -> bool {
        matches!(self, Self::Backtracking | Self::Abandoned | Self::TooLong)
    }
}

/// Signals whose absence cost the session score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGap {
    NoFix,
    NoTestsPassed,
    NoClearResolution,
    NoUserConfirmation,
    TooShort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionQuality {
    /// In [0, 1].
    pub score: f32,
    pub signals: Vec<QualitySignal>,
    pub missing: Vec<QualityGap>,
    pub passed: bool,
}

impl SessionQuality {
    pub fn summary(&self) -> String {
        let grade = match self.score {
            s if s >= 0.8 => "excellent",
            s if s >= 0.6 => "good",
            s if s >= 0.4 => "fair",
            s if s >= 0.2 => "poor",
            _ => "very poor",
        };
        format!(
            "{} ({:.0}%): {} signal(s), {} missing",
            grade,
            self.score * 100.0,
            self.signals.len(),
            self.missing.len()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn score(&self, fragments: &[TranscriptFragment]) -> SessionQuality {
        let c = &self.config;
        let lowered: Vec<(Role, String)> = fragments
            .iter()
            .map(|f| (f.role, f.text.to_lowercase()))
            .collect();

        let mut score = 0.0f32;
        let mut signals = Vec::new();
        let mut missing = Vec::new();

        if lowered.len() < c.min_fragments {
            missing.push(QualityGap::TooShort);
        }
        if lowered.len() > c.max_fragments {
            score -= c.length_penalty;
            signals.push(QualitySignal::TooLong);
        }

        let checks = [
            (
                has_fix(&lowered),
                c.fix_weight,
                QualitySignal::FixApplied,
                QualityGap::NoFix,
            ),
            (
                has_tests_passed(&lowered),
                c.tests_weight,
                QualitySignal::TestsPassed,
                QualityGap::NoTestsPassed,
            ),
            (
                has_clear_resolution(&lowered),
                c.resolution_weight,
                QualitySignal::ClearResolution,
                QualityGap::NoClearResolution,
            ),
            (
                has_user_confirmation(&lowered),
                c.confirmation_weight,
                QualitySignal::UserConfirmed,
                QualityGap::NoUserConfirmation,
            ),
        ];
        for (present, weight, signal, gap) in checks {
            if present {
                score += weight;
                signals.push(signal);
            } else {
                missing.push(gap);
            }
        }

        if has_backtracking(&lowered) {
            score -= c.backtracking_penalty;
            signals.push(QualitySignal::Backtracking);
        }
        if is_abandoned(&lowered) {
            score -= c.abandoned_penalty;
            signals.push(QualitySignal::Abandoned);
        }

        let score = score.clamp(0.0, 1.0);
        let quality = SessionQuality {
            score,
            passed: score >= c.min_score,
            signals,
            missing,
        };
        debug!(
            score = quality.score,
            passed = quality.passed,
            signals = ?quality.signals,
            "Scored session quality"
        );
        quality
    }
}

fn contains_any(text: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| text.contains(cue))
}

fn has_fix(fragments: &[(Role, String)]) -> bool {
    fragments
        .iter()
        .filter(|(role, _)| *role == Role::Assistant)
        .any(|(_, text)| {
            text.split(|c: char| !c.is_alphanumeric())
                .any(|token| fix_action(token).is_some())
        })
}

fn has_tests_passed(fragments: &[(Role, String)]) -> bool {
    fragments
        .iter()
        .any(|(_, text)| contains_any(text, TEST_SUCCESS_CUES))
}

fn has_clear_resolution(fragments: &[(Role, String)]) -> bool {
    fragments
        .iter()
        .filter(|(role, _)| *role == Role::Assistant)
        .rev()
        .take(3)
        .any(|(_, text)| contains_any(text, RESOLUTION_CUES))
}

fn has_user_confirmation(fragments: &[(Role, String)]) -> bool {
    fragments
        .iter()
        .filter(|(role, _)| *role == Role::User)
        .rev()
        .take(5)
        .any(|(_, text)| contains_any(text, CONFIRMATION_CUES))
}

/// One walk-back is normal; two or more is thrashing.
fn has_backtracking(fragments: &[(Role, String)]) -> bool {
    fragments
        .iter()
        .filter(|(role, text)| {
            matches!(role, Role::Assistant | Role::Tool) && contains_any(text, BACKTRACK_CUES)
        })
        .count()
        >= 2
}

fn is_abandoned(fragments: &[(Role, String)]) -> bool {
    let Some((role, text)) = fragments.last() else {
        return true;
    };
    if *role == Role::User && (text.trim().is_empty() || contains_any(text, ABANDON_CUES)) {
        return true;
    }

    // Error-heavy tail with nothing resolved.
    let errors = fragments
        .iter()
        .rev()
        .take(5)
        .filter(|(_, text)| text.contains("error"))
        .count();
    errors >= 3 && !has_clear_resolution(fragments)
}
