//! Structural feature extraction.
//!
//! Turns a redacted fragment into a `StructuralPattern`: a
//! `(domain, problem class, solution shape)` classifier used as the
//! similarity key, a content fingerprint and a short search signature.
//! Extraction is pure; identical input yields an identical fingerprint.
//! Sessions are scored for signal quality first, so abandoned or thrashing
//! transcripts never reach extraction.

mod arena;
mod extractor;
mod quality;
mod types;
mod vocabulary;

pub use arena::{PatternArena, PatternId};
pub use extractor::{Extraction, FeatureExtractor, Neighbours};
pub use quality::{QualityGap, QualityScorer, QualitySignal, SessionQuality};
pub use types::{Classifier, Domain, OutcomeHint, OutcomeSignals, StructuralPattern};
