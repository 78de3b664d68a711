use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{MinerError, Result};

pub const CONFIG_FILE: &str = "miner.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub redaction: RedactionConfig,
    pub taint: TaintPolicyConfig,
    pub extraction: ExtractionConfig,
    pub quality: QualityConfig,
    pub clustering: ClusteringConfig,
    pub validation: ValidationConfig,
    pub uncertainty: UncertaintyConfig,
    pub dedup: DedupConfig,
    pub pipeline: PipelineConfig,
}

impl MinerConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        fs::create_dir_all(dir).await?;
        let content =
            toml::to_string_pretty(self).map_err(|e| MinerError::Config(e.to_string()))?;
        fs::write(dir.join(CONFIG_FILE), content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        let unit = |name: &str, v: f32, errors: &mut Vec<String>| {
            if !(0.0..=1.0).contains(&v) {
                errors.push(format!("{} must be between 0.0 and 1.0", name));
            }
        };

        // Redaction
        if self.redaction.entropy_threshold <= 0.0 {
            errors.push("redaction.entropy_threshold must be positive".into());
        }
        if self.redaction.min_entropy_len < 8 {
            errors.push("redaction.min_entropy_len must be >= 8".into());
        }

        // Quality
        let q = &self.quality;
        unit("quality.min_score", q.min_score, &mut errors);
        if q.min_fragments > q.max_fragments {
            errors.push("quality.min_fragments must be <= max_fragments".into());
        }
        for (name, w) in [
            ("quality.fix_weight", q.fix_weight),
            ("quality.tests_weight", q.tests_weight),
            ("quality.resolution_weight", q.resolution_weight),
            ("quality.confirmation_weight", q.confirmation_weight),
            ("quality.backtracking_penalty", q.backtracking_penalty),
            ("quality.abandoned_penalty", q.abandoned_penalty),
            ("quality.length_penalty", q.length_penalty),
        ] {
            unit(name, w, &mut errors);
        }

        // Clustering
        let c = &self.clustering;
        if c.min_cluster_size < 2 {
            errors.push("clustering.min_cluster_size must be >= 2".into());
        }
        if c.seed_floor < 2 || c.seed_floor > c.min_cluster_size {
            errors.push("clustering.seed_floor must be in 2..=min_cluster_size".into());
        }
        unit("clustering.join_threshold", c.join_threshold, &mut errors);
        let weight_sum = c.domain_weight + c.problem_weight + c.shape_weight + c.keyword_weight;
        if (weight_sum - 1.0).abs() > 0.001 {
            errors.push("clustering weights must sum to 1.0".into());
        }

        // Validation
        let v = &self.validation;
        unit("validation.promote_threshold", v.promote_threshold, &mut errors);
        if v.min_instances == 0 {
            errors.push("validation.min_instances must be greater than 0".into());
        }
        let confidence_sum =
            v.coverage_weight + v.predictive_weight + v.coherence_weight + v.specificity_weight;
        if (confidence_sum - 1.0).abs() > 0.001 {
            errors.push("validation confidence weights must sum to 1.0".into());
        }
        unit(
            "validation.platitude_coverage",
            v.platitude_coverage,
            &mut errors,
        );
        unit(
            "validation.platitude_coherence",
            v.platitude_coherence,
            &mut errors,
        );
        unit(
            "validation.platitude_specificity",
            v.platitude_specificity,
            &mut errors,
        );

        // Uncertainty
        let u = &self.uncertainty;
        if u.min_queries == 0 || u.min_queries > u.max_queries {
            errors.push("uncertainty.min_queries must be in 1..=max_queries".into());
        }
        if u.max_queue_size == 0 {
            errors.push("uncertainty.max_queue_size must be greater than 0".into());
        }
        if u.max_attempts == 0 {
            errors.push("uncertainty.max_attempts must be greater than 0".into());
        }
        unit(
            "uncertainty.strong_counterexample_confidence",
            u.strong_counterexample_confidence,
            &mut errors,
        );

        // Dedup decision table must stay ordered
        let d = &self.dedup;
        unit("dedup.floor", d.floor, &mut errors);
        if !(d.floor < d.near_merge_similarity && d.near_merge_similarity < d.merge_similarity) {
            errors.push("dedup thresholds must satisfy floor < near_merge < merge".into());
        }
        unit("dedup.merge_overlap", d.merge_overlap, &mut errors);
        unit("dedup.low_unique_ratio", d.low_unique_ratio, &mut errors);

        // Pipeline
        if self.pipeline.fetch_timeout_ms == 0 {
            errors.push("pipeline.fetch_timeout_ms must be greater than 0".into());
        }
        if self.pipeline.search_limit == 0 {
            errors.push("pipeline.search_limit must be greater than 0".into());
        }
        if self.pipeline.retry.base_delay_ms > self.pipeline.retry.max_delay_ms {
            errors.push("pipeline.retry.base_delay_ms must be <= max_delay_ms".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MinerError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Secret, PII and injection scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Shannon entropy (bits per char) above which an opaque token is a finding.
    pub entropy_threshold: f64,
    /// Minimum token length considered for entropy detection.
    pub min_entropy_len: usize,
    pub detect_pii: bool,
    pub detect_injection: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: 4.0,
            min_entropy_len: 24,
            detect_pii: true,
            detect_injection: true,
        }
    }
}

/// Toggles for which taint combinations the safety predicates accept.
/// `contains-secret` and `contains-injection` are never accepted for evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaintPolicyConfig {
    pub allow_pii_in_evidence: bool,
    pub allow_pii_in_prompt: bool,
    pub allow_tool_output_in_prompt: bool,
}

impl Default for TaintPolicyConfig {
    fn default() -> Self {
        Self {
            allow_pii_in_evidence: false,
            allow_pii_in_prompt: false,
            allow_tool_output_in_prompt: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Fragments shorter than this (in chars, after trimming) carry no pattern.
    pub min_fragment_chars: usize,
    /// Keywords kept in the search signature.
    pub signature_keywords: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_fragment_chars: 8,
            signature_keywords: 6,
        }
    }
}

/// Session quality gate applied before extraction.
/// score = fix + tests + resolution + confirmation - penalties, clamped to [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub enabled: bool,
    /// Sessions scoring below this are not mined.
    pub min_score: f32,
    pub fix_weight: f32,
    pub tests_weight: f32,
    pub resolution_weight: f32,
    pub confirmation_weight: f32,
    pub backtracking_penalty: f32,
    pub abandoned_penalty: f32,
    pub length_penalty: f32,
    /// Fewer fragments than this is reported as a gap.
    pub min_fragments: usize,
    /// More fragments than this costs `length_penalty`.
    pub max_fragments: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_score: 0.3,
            fix_weight: 0.35,
            tests_weight: 0.20,
            resolution_weight: 0.15,
            confirmation_weight: 0.15,
            backtracking_penalty: 0.25,
            abandoned_penalty: 0.40,
            length_penalty: 0.05,
            min_fragments: 2,
            max_fragments: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Clusters smaller than this are not eligible for promotion.
    pub min_cluster_size: usize,
    /// Undersized groups at or above this size are deferred instead of dropped.
    pub seed_floor: usize,
    /// Minimum similarity to the seed for a pattern to join its cluster.
    pub join_threshold: f32,
    pub domain_weight: f32,
    pub problem_weight: f32,
    pub shape_weight: f32,
    pub keyword_weight: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            seed_floor: 2,
            join_threshold: 0.6,
            domain_weight: 0.25,
            problem_weight: 0.35,
            shape_weight: 0.20,
            keyword_weight: 0.20,
        }
    }
}

/// Generalization scoring.
/// confidence = coverage·w₁ + predictive_power·w₂ + coherence·w₃ + specificity·w₄
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub promote_threshold: f32,
    pub min_instances: usize,
    pub coverage_weight: f32,
    pub predictive_weight: f32,
    pub coherence_weight: f32,
    pub specificity_weight: f32,
    /// Coverage above which a low-coherence candidate is treated as a platitude.
    pub platitude_coverage: f32,
    /// Coherence below which a high-coverage candidate is treated as a platitude.
    pub platitude_coherence: f32,
    /// Specificity assigned to platitudes.
    pub platitude_specificity: f32,
    /// Specificity otherwise: 1.0 - slope·coverage.
    pub specificity_slope: f32,
    /// Coherence below this is reported as a missing signal.
    pub low_coherence: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            promote_threshold: 0.7,
            min_instances: 3,
            coverage_weight: 0.35,
            predictive_weight: 0.35,
            coherence_weight: 0.20,
            specificity_weight: 0.10,
            platitude_coverage: 0.95,
            platitude_coherence: 0.5,
            platitude_specificity: 0.3,
            specificity_slope: 0.2,
            low_coherence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub min_queries: usize,
    pub max_queries: usize,
    pub max_queue_size: usize,
    pub expiry_days: i64,
    /// Discard-on-counterexample policy for candidates queued with conflicts.
    pub discard_on_counterexample: bool,
    /// Counterexamples at or above this confidence count as strong.
    pub strong_counterexample_confidence: f32,
    /// Evidence applications before an unresolved item is escalated.
    pub max_attempts: usize,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            min_queries: 3,
            max_queries: 7,
            max_queue_size: 500,
            expiry_days: 30,
            discard_on_counterexample: true,
            strong_counterexample_confidence: 0.8,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Entries below this similarity are not reported.
    pub floor: f32,
    pub merge_similarity: f32,
    pub merge_overlap: f32,
    pub near_merge_similarity: f32,
    /// Unique-content ratio below which a near match merges.
    pub low_unique_ratio: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            floor: 0.60,
            merge_similarity: 0.90,
            merge_overlap: 0.80,
            near_merge_similarity: 0.75,
            low_unique_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch_timeout_ms: u64,
    pub similarity_timeout_ms: u64,
    /// Fragments requested from the evidence store per discovery query.
    pub search_limit: usize,
    /// Max chars kept for an evidence excerpt.
    pub excerpt_max_chars: usize,
    pub checkpoint_enabled: bool,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            similarity_timeout_ms: 2_000,
            search_limit: 500,
            excerpt_max_chars: 280,
            checkpoint_enabled: true,
            retry: RetryConfig::default(),
        }
    }
}

/// On-disk layout of the engine's artifacts.
#[derive(Debug, Clone)]
pub struct MinerPaths {
    pub root: PathBuf,
    pub knowledge_db: PathBuf,
    pub queue_file: PathBuf,
    pub audit_log: PathBuf,
    pub checkpoints_dir: PathBuf,
}

impl MinerPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            knowledge_db: root.join("knowledge.db"),
            queue_file: root.join("uncertainty").join("queue.json"),
            audit_log: root.join("audit").join("redaction.jsonl"),
            checkpoints_dir: root.join("checkpoints"),
            root,
        }
    }
}
