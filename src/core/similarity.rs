use std::collections::BTreeMap;

/// Pluggable text similarity used as the secondary matching signal.
pub trait SemanticSimilarity: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity in `[0, 1]`. Must be deterministic for identical inputs.
    fn similarity(&self, left: &str, right: &str) -> f64;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "our", "that", "the", "their", "this", "to", "was", "we",
    "were", "will", "with", "you", "your",
];

/// Cosine similarity over term-frequency vectors.
#[derive(Debug, Clone, Default)]
pub struct BagOfTermsCosine;

impl BagOfTermsCosine {
    fn term_frequencies(text: &str) -> BTreeMap<String, f64> {
        let mut terms = BTreeMap::new();
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#')) {
            if token.chars().count() < 2 || STOPWORDS.contains(&token) {
                continue;
            }
            *terms.entry(token.to_string()).or_insert(0.0) += 1.0;
        }
        terms
    }
}

impl SemanticSimilarity for BagOfTermsCosine {
    fn name(&self) -> &'static str {
        "bag_of_terms_cosine"
    }

    fn similarity(&self, left: &str, right: &str) -> f64 {
        let a = Self::term_frequencies(left);
        let b = Self::term_frequencies(right);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        // BTreeMap iteration keeps the floating point summation order fixed.
        let dot: f64 = a
            .iter()
            .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
            .sum();
        let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
        let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}
