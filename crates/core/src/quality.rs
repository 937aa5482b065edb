use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryQuality {
    pub score: f64,
    pub is_clear: bool,
    pub word_count: usize,
}

/// Cheap clarity estimate attached to request logs.
pub fn evaluate_query_quality(query: &str) -> QueryQuality {
    let word_count = query.split_whitespace().count();
    let mut score: f64 = 1.0;

    if word_count < 3 {
        score -= 0.3;
    }
    if word_count > 100 {
        score -= 0.2;
    }
    if !query.contains('?') && word_count < 5 {
        score -= 0.1;
    }

    let score = score.max(0.0);
    QueryQuality { score, is_clear: score > 0.5, word_count }
}
