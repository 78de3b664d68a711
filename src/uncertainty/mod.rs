//! Uncertainty queue: deferred candidates waiting for more evidence.
//!
//! ```text
//! Pending ──evidence clears boundary──▶ ResolvedPromote
//!    │    ──strong counterexample────▶ ResolvedDiscard
//!    └────expiry / capacity──────────▶ Discarded
//! ```
//!
//! Each item carries 3–7 follow-up queries planned from the candidate's
//! missing signals. Applying evidence and resolving are idempotent.

mod queries;
mod queue;
mod types;

pub use queries::QueryPlanner;
pub use queue::UncertaintyQueue;
pub use types::{
    ApplyOutcome, DecisionBoundary, EvidenceUpdate, QueryKind, QueueStats, Resolution,
    ResolutionAttempt, SuggestedQuery, UncertaintyCounts, UncertaintyItem, UncertaintyReason,
    UncertaintyStatus,
};
