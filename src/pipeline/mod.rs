//! Mining run orchestration.
//!
//! A run moves through discovery, clustering, validation and dedup. After
//! each phase it writes a checkpoint; `MiningPipeline::resume` picks up
//! from the latest one. Stop requests are honoured between transcripts,
//! clusters and candidates (`Cancel`) or between phases (`Drain`).

mod checkpoint;
mod miner;
mod signal;

pub use checkpoint::{CheckpointManager, RunCheckpoint, RunCounts, RunPhase};
pub use miner::{MiningPipeline, RunReport};
pub use signal::{CancelSignal, StopRequest};
