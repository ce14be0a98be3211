//! Lexical similarity used by the local fallback stores, which have no embeddings.

use crate::infrastructure::entities::StoredMessage;
use std::collections::HashMap;

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        *terms.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

/// Cosine distance between the bag-of-words vectors of two texts, in `[0, 1]`.
/// Texts without any word are at distance 1 from everything.
pub fn cosine_distance(a: &str, b: &str) -> f64 {
    let a = term_frequencies(a);
    let b = term_frequencies(b);
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &HashMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();

    (1.0 - dot / (norm(&a) * norm(&b))).clamp(0.0, 1.0)
}

/// Ranks messages by ascending distance to `query` and keeps the best `limit`.
pub fn rank(messages: Vec<StoredMessage>, query: &str, limit: usize) -> Vec<(StoredMessage, f64)> {
    let mut scored: Vec<_> = messages
        .into_iter()
        .map(|m| {
            let distance = cosine_distance(query, &m.content);
            (m, distance)
        })
        .collect();
    scored.sort_by(|(_, a), (_, b)| a.total_cmp(b));
    scored.truncate(limit);
    scored
}
