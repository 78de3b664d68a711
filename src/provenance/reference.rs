use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::evidence::{EvidenceStore, FragmentRange, FragmentRef, TranscriptFragment};
use crate::redaction::Redactor;
use crate::utils::content_hash;

/// Pointer from a rule back to the redacted fragment that supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceReference {
    pub transcript_id: String,
    pub range: FragmentRange,
    /// SHA-256 of the redacted fragment text.
    pub content_hash: String,
    pub confidence: f32,
    pub captured_at: DateTime<Utc>,
}

impl EvidenceReference {
    pub fn capture(fragment: &TranscriptFragment, confidence: f32) -> Self {
        Self {
            transcript_id: fragment.source_id.clone(),
            range: fragment.range,
            content_hash: content_hash(&fragment.text),
            confidence,
            captured_at: Utc::now(),
        }
    }

    pub fn fragment_ref(&self) -> FragmentRef {
        FragmentRef {
            transcript_id: self.transcript_id.clone(),
            range: self.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Verified,
    HashMismatch,
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: Vec<FragmentRef>,
    pub mismatched: Vec<FragmentRef>,
    pub missing: Vec<FragmentRef>,
}

impl Verification {
    /// At least one reference, and every reference verified.
    pub fn is_sound(&self) -> bool {
        !self.verified.is_empty() && self.mismatched.is_empty() && self.missing.is_empty()
    }

    fn record(&mut self, fragment: FragmentRef, status: ReferenceStatus) {
        match status {
            ReferenceStatus::Verified => self.verified.push(fragment),
            ReferenceStatus::HashMismatch => self.mismatched.push(fragment),
            ReferenceStatus::Missing => self.missing.push(fragment),
        }
    }
}

/// Re-fetch each referenced transcript, re-redact the fragment and compare
/// hashes. Store failures count as missing rather than aborting.
pub async fn verify_references(
    references: &[EvidenceReference],
    store: &dyn EvidenceStore,
    redactor: &Redactor,
) -> Verification {
    let mut verification = Verification::default();

    for reference in references {
        let status = match store.get(&reference.transcript_id).await {
            Ok(transcript) => match transcript.fragment_at(&reference.range) {
                Some(fragment) => {
                    let (redacted, _) = redactor.redact_fragment(&fragment);
                    if content_hash(&redacted.text) == reference.content_hash {
                        ReferenceStatus::Verified
                    } else {
                        ReferenceStatus::HashMismatch
                    }
                }
                None => ReferenceStatus::Missing,
            },
            Err(e) => {
                warn!(
                    transcript_id = %reference.transcript_id,
                    error = %e,
                    "Evidence reference could not be fetched"
                );
                ReferenceStatus::Missing
            }
        };
        verification.record(reference.fragment_ref(), status);
    }

    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{InMemoryEvidenceStore, Role, Transcript};

    fn store() -> InMemoryEvidenceStore {
        InMemoryEvidenceStore::from_transcripts([Transcript::new("t1")
            .with_message(Role::User, "The decorative SVG is announced by screen readers")
            .with_message(Role::Assistant, "Added aria-hidden=\"true\" to the decorative SVG")])
    }

    #[tokio::test]
    async fn test_verify_matches_redacted_hash() {
        let store = store();
        let transcript = store.get("t1").await.unwrap();
        let (redacted, _) = Redactor::default().redact_fragment(&transcript.fragments()[1]);
        let reference = EvidenceReference::capture(&redacted, 0.9);

        let verification = verify_references(&[reference], &store, &Redactor::default())
            .await;
        assert!(verification.is_sound());
    }

    #[tokio::test]
    async fn test_verify_reports_mismatch_and_missing() {
        let store = store();
        let transcript = store.get("t1").await.unwrap();
        let mut tampered = EvidenceReference::capture(&transcript.fragments()[1], 0.9);
        tampered.content_hash = "0".repeat(64);
        let mut gone = tampered.clone();
        gone.transcript_id = "nope".into();

        let verification = verify_references(&[tampered, gone], &store, &Redactor::default())
            .await;
        assert!(!verification.is_sound());
        assert_eq!(verification.mismatched.len(), 1);
        assert_eq!(verification.missing.len(), 1);
    }

    #[test]
    fn test_empty_verification_is_not_sound() {
        assert!(!Verification::default().is_sound());
    }
}
