//! Embedding storage format and brute-force similarity ranking.
//!
//! Embeddings are stored as little-endian `f32` blobs. Search loads a
//! tenant's rows and scores them in process; rows whose dimension differs
//! from the query are skipped.

use crate::repositories::RepositoryError;

pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, RepositoryError> {
    if blob.len() % 4 != 0 {
        return Err(RepositoryError::Decode(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// Cosine similarity computed in f64. Mismatched lengths and zero vectors
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

fn is_zero(embedding: &[f32]) -> bool {
    embedding.iter().all(|value| *value == 0.0)
}

/// Scores every candidate against `query`, keeps those at or above
/// `threshold`, and returns at most `limit` in descending order.
pub fn rank<T>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (T, Vec<f32>)>,
    threshold: f64,
    limit: usize,
) -> Vec<(T, f64)> {
    if limit == 0 || query.is_empty() || is_zero(query) {
        return Vec::new();
    }

    let mut scored = candidates
        .into_iter()
        .filter(|(_, embedding)| embedding.len() == query.len())
        .map(|(candidate, embedding)| {
            let similarity = cosine_similarity(query, &embedding);
            (candidate, similarity)
        })
        .filter(|(_, similarity)| *similarity >= threshold)
        .collect::<Vec<_>>();

    scored.sort_by(|left, right| right.1.total_cmp(&left.1));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::{blob_to_embedding, cosine_similarity, embedding_to_blob, rank};

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_and_opposite_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn blob_layout_is_little_endian() {
        let blob = embedding_to_blob(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0_f32.to_le_bytes());
        assert_eq!(blob_to_embedding(&blob).expect("decode"), vec![1.0, -0.5]);
    }

    #[test]
    fn truncated_blob_is_a_decode_error() {
        assert!(blob_to_embedding(&[0, 0, 128]).is_err());
    }

    #[test]
    fn rank_filters_sorts_and_truncates() {
        let query = [1.0_f32, 0.0];
        let candidates = vec![
            ("orthogonal", vec![0.0, 1.0]),
            ("close", vec![0.9, 0.1]),
            ("exact", vec![2.0, 0.0]),
            ("wrong-dimension", vec![1.0, 0.0, 0.0]),
            ("mid", vec![0.6, 0.6]),
        ];

        let ranked = rank(&query, candidates, 0.5, 2);
        let names = ranked.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        assert_eq!(names, vec!["exact", "close"]);
    }

    #[test]
    fn zero_query_returns_nothing() {
        let ranked = rank(&[0.0_f32, 0.0], vec![("a", vec![1.0, 0.0])], 0.0, 5);
        assert!(ranked.is_empty());
    }
}
