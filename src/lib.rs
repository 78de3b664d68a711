pub mod cluster;
pub mod config;
pub mod dedup;
pub mod error;
pub mod evidence;
pub mod features;
pub mod knowledge;
pub mod logging;
pub mod pipeline;
pub mod provenance;
pub mod redaction;
pub mod uncertainty;
pub mod utils;
pub mod validation;

pub use cluster::{Clusterer, Clustering, InstanceCluster};
pub use config::{MinerConfig, MinerPaths};
pub use dedup::{DedupAction, DedupReport, Deduplicator};
pub use error::{MinerError, Result, StoreFailure};
pub use evidence::{EvidenceStore, InMemoryEvidenceStore, Transcript, TranscriptFragment};
pub use features::{FeatureExtractor, PatternArena, StructuralPattern};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeBase, SkillRule, SqliteKnowledgeBase};
pub use pipeline::{CancelSignal, CheckpointManager, MiningPipeline, RunPhase, RunReport};
pub use provenance::{EvidenceReference, ProvenanceGraph, verify_references};
pub use redaction::{Redactor, TaintLabel, TaintPolicy, TaintSet};
pub use uncertainty::{UncertaintyItem, UncertaintyQueue, UncertaintyReason, UncertaintyStatus};
pub use validation::{GeneralPattern, GeneralizationValidator, Verdict};
