//! Injected capabilities: prose, critique and semantic similarity.

use async_trait::async_trait;

use super::types::{ApplicabilityConditions, GeneralPattern};
use crate::error::Result;
use crate::utils::{cosine_similarity, term_frequencies};

/// Input to the describe step. Only taint-safe, redacted text reaches it.
#[derive(Debug, Clone)]
pub struct DescribeRequest<'a> {
    pub conditions: &'a ApplicabilityConditions,
    pub solution_phrase: &'a str,
    pub instance_count: usize,
}

/// Turns a candidate into principle text.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, request: &DescribeRequest<'_>) -> Result<String>;
}

/// Local describer that fills a fixed template.
#[derive(Debug, Clone, Default)]
pub struct TemplateDescriber;

impl TemplateDescriber {
    pub fn compose(request: &DescribeRequest<'_>) -> String {
        let c = request.conditions;
        let scope = match &c.file_type {
            Some(ft) => format!("{} work on .{} files", c.domain, ft),
            None => format!("{} work", c.domain),
        };
        format!(
            "When {} comes up in {}, apply {}: {} (seen in {} sessions)",
            c.problem_class,
            scope,
            c.solution_shape,
            request.solution_phrase,
            request.instance_count
        )
    }
}

#[async_trait]
impl Describer for TemplateDescriber {
    async fn describe(&self, request: &DescribeRequest<'_>) -> Result<String> {
        Ok(Self::compose(request))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Critique {
    pub overgeneralized: bool,
    pub notes: Vec<String>,
}

/// Optional reviewer that may flag overgeneralization.
#[async_trait]
pub trait CritiqueProvider: Send + Sync {
    async fn critique(&self, candidate: &GeneralPattern) -> Result<Critique>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopCritique;

#[async_trait]
impl CritiqueProvider for NoopCritique {
    async fn critique(&self, _candidate: &GeneralPattern) -> Result<Critique> {
        Ok(Critique::default())
    }
}

/// Semantic similarity of two texts in `[0, 1]`.
#[async_trait]
pub trait SimilarityModel: Send + Sync {
    async fn similarity(&self, a: &str, b: &str) -> Result<f32>;
}

/// Term-frequency cosine. Deterministic and dependency free.
#[derive(Debug, Clone, Default)]
pub struct TermFrequencyModel;

impl TermFrequencyModel {
    pub fn score(a: &str, b: &str) -> f32 {
        cosine_similarity(&term_frequencies(a), &term_frequencies(b))
    }
}

#[async_trait]
impl SimilarityModel for TermFrequencyModel {
    async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        Ok(Self::score(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Domain;

    #[test]
    fn test_template_mentions_conditions() {
        let conditions = ApplicabilityConditions {
            domain: Domain::Accessibility,
            problem_class: "missing-attribute".into(),
            solution_shape: "add-attribute".into(),
            file_type: Some("tsx".into()),
        };
        let text = TemplateDescriber::compose(&DescribeRequest {
            conditions: &conditions,
            solution_phrase: "added aria-hidden=true decorative svg",
            instance_count: 3,
        });
        assert!(text.contains("missing-attribute"));
        assert!(text.contains(".tsx"));
        assert!(text.contains("aria-hidden=true"));
    }

    #[tokio::test]
    async fn test_term_frequency_model() {
        let model = TermFrequencyModel;
        let same = model.similarity("add aria-hidden", "add aria-hidden").await.unwrap();
        assert!((same - 1.0).abs() < 1e-5);
        let none = model.similarity("pin lodash", "add aria-hidden").await.unwrap();
        assert_eq!(none, 0.0);
    }
}
