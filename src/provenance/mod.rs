//! Evidence and provenance tracking.
//!
//! The graph links rule → pattern → fragment → transcript so that both the
//! safety check (nothing tainted reachable from a rule) and the no-orphan
//! check (every rule's references re-hash against the store) are walks.

mod graph;
mod reference;

pub use graph::{EdgeKind, FragmentNode, NodeId, ProvenanceGraph, ProvenanceNode};
pub use reference::{EvidenceReference, ReferenceStatus, Verification, verify_references};
