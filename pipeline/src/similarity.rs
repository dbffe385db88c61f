//! Token-set similarity, shared by novelty scoring and cluster merging.

use std::collections::BTreeSet;

/// Tokenize a body into its significant lowercase words. Short words carry
/// little duplicate signal and are dropped.
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two token sets, in [0,1]. Two empty sets are
/// treated as dissimilar: an empty body duplicates nothing.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Convenience wrapper over raw bodies.
pub fn body_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}
