use std::collections::{BTreeMap, BTreeSet};

/// Jaccard similarity of two token sets. Two empty sets are identical.
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f32 {
    let a: BTreeSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let b: BTreeSet<&str> = b.iter().map(AsRef::as_ref).collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Term frequencies over lowercase alphanumeric tokens.
/// Ordered map so iteration (and thus float summation) is deterministic.
pub fn term_frequencies(text: &str) -> BTreeMap<String, f32> {
    let mut tf = BTreeMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|t| !t.is_empty())
    {
        *tf.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two sparse vectors.
pub fn cosine_similarity(a: &BTreeMap<String, f32>, b: &BTreeMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f32 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a: f32 = a.values().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
