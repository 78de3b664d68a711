use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::types::{Transcript, TranscriptFragment};
use crate::error::{Result, StoreFailure};
use crate::utils::extract_keywords;

/// Read-only transcript corpus. The engine never mutates it.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Fragments matching `query`, in (transcript id, message index) order.
    /// An empty query or `*` matches every fragment.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<TranscriptFragment>, StoreFailure>;

    async fn get(&self, transcript_id: &str) -> std::result::Result<Transcript, StoreFailure>;
}

/// Evidence store backed by an ordered in-memory map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEvidenceStore {
    transcripts: BTreeMap<String, Transcript>,
}

impl InMemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transcripts(transcripts: impl IntoIterator<Item = Transcript>) -> Self {
        let mut store = Self::new();
        for t in transcripts {
            store.insert(t);
        }
        store
    }

    pub fn insert(&mut self, transcript: Transcript) {
        self.transcripts.insert(transcript.id.clone(), transcript);
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }

    /// Load a JSON Lines corpus, one transcript per line.
    /// Malformed lines are skipped and reported by line number.
    pub async fn load_jsonl(path: &Path) -> Result<(Self, Vec<usize>)> {
        let content = fs::read_to_string(path).await?;
        let mut store = Self::new();
        let mut malformed = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Transcript>(line) {
                Ok(transcript) => store.insert(transcript),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "Skipping malformed transcript line");
                    malformed.push(idx + 1);
                }
            }
        }

        debug!(
            transcripts = store.len(),
            malformed = malformed.len(),
            path = %path.display(),
            "Loaded transcript corpus"
        );
        Ok((store, malformed))
    }
}

fn matches_query(fragment: &TranscriptFragment, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let lower = fragment.text.to_lowercase();
    terms.iter().any(|t| lower.contains(t.as_str()))
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<TranscriptFragment>, StoreFailure> {
        let terms = if query.trim() == "*" {
            Vec::new()
        } else {
            extract_keywords(query)
        };

        Ok(self
            .transcripts
            .values()
            .flat_map(|t| t.fragments())
            .filter(|f| matches_query(f, &terms))
            .take(limit)
            .collect())
    }

    async fn get(&self, transcript_id: &str) -> std::result::Result<Transcript, StoreFailure> {
        self.transcripts
            .get(transcript_id)
            .cloned()
            .ok_or_else(|| StoreFailure::NotFound(transcript_id.to_string()))
    }
}
