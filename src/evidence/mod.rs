//! Evidence store: the read-only transcript corpus.
//!
//! - `Transcript`, `TranscriptFragment`: corpus data, immutable once fetched
//! - `EvidenceStore`: the collaborator contract (`search`, `get`)
//! - `InMemoryEvidenceStore`: ordered in-memory corpus with a JSONL loader

mod store;
mod types;

pub use store::{EvidenceStore, InMemoryEvidenceStore};
pub use types::{
    FragmentContext, FragmentRange, FragmentRef, Role, Transcript, TranscriptFragment,
    TranscriptMessage,
};
