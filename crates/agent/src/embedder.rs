use std::collections::BTreeMap;

use async_trait::async_trait;
use ragdesk_core::errors::EmbeddingError;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic local embedder: FNV-1a term buckets with signed
/// contributions, adjacent-term pairs at half weight, L2-normalised.
///
/// Queries and knowledge chunks must be embedded by the same instance
/// configuration for scores to be comparable.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let terms = tokenize(text);
        let mut weights: BTreeMap<String, f32> = BTreeMap::new();
        for term in &terms {
            *weights.entry(term.clone()).or_default() += 1.0;
        }
        for pair in terms.windows(2) {
            *weights.entry(format!("{} {}", pair[0], pair[1])).or_default() += 0.5;
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        for (term, weight) in &weights {
            let hash = fnv1a(term);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight * (1.0 + (term.len() as f32).ln());
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if tokenize(text).is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.vector(text))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '@' && c != '.')
        .map(|term| term.trim_matches('.'))
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fnv1a(term: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in term.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use ragdesk_core::errors::EmbeddingError;
    use ragdesk_db::vectors::cosine_similarity;

    use super::{Embedder, HashingEmbedder};

    #[tokio::test]
    async fn vectors_are_unit_length_and_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let first = embedder.embed("Where is your office located?").await.expect("embed");
        let second = embedder.embed("Where is your office located?").await.expect("embed");

        assert_eq!(first.len(), 384);
        assert_eq!(first, second);
        let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn shared_terms_score_higher_than_unrelated_text() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed("office address").await.expect("embed");
        let related = embedder.embed("Our office address is 1 High Street").await.expect("embed");
        let unrelated = embedder.embed("We build mobile games").await.expect("embed");

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let embedder = HashingEmbedder::new(16);
        assert_eq!(embedder.embed("  ?! ").await, Err(EmbeddingError::EmptyInput));
    }
}
