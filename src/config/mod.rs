//! Configuration types and loading.
//!
//! `MinerConfig` is the top-level configuration, one section per engine stage.
//! All thresholds are tunable; defaults match the documented scoring model.

mod settings;

pub use settings::{
    CONFIG_FILE, ClusteringConfig, DedupConfig, ExtractionConfig, MinerConfig, MinerPaths,
    PipelineConfig, QualityConfig, RedactionConfig, RetryConfig, TaintPolicyConfig,
    UncertaintyConfig, ValidationConfig,
};
