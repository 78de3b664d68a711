//! Generalization validation.
//!
//! Scores the candidate rule a cluster implies and decides between
//! promotion, deferral to the uncertainty queue, and a hard drop when the
//! members' combined taint fails a safety predicate.
//!
//! ```text
//! coverage         = |applies| / N
//! predictive_power = |correct| / |applies|
//! coherence        = mean pairwise similarity of the applying fixes
//! specificity      = platitude ? 0.3 : 1 - 0.2 * coverage
//! confidence       = 0.35 cov + 0.35 pred + 0.20 coh + 0.10 specificity
//! ```

mod collaborators;
mod types;
mod validator;

pub use collaborators::{
    Critique, CritiqueProvider, DescribeRequest, Describer, NoopCritique, SimilarityModel,
    TemplateDescriber, TermFrequencyModel,
};
pub use types::{
    ApplicabilityConditions, ConfidenceScores, Counterexample, CounterexampleKind,
    GeneralPattern, MissingSignal, SafetyViolation, Verdict,
};
pub use validator::{Draft, GeneralizationValidator};
