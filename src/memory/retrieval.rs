//! Ranking functions for hybrid retrieval
//!
//! Combined score = `alpha * semantic + (1 - alpha) * keyword`. The
//! keyword half is distinct-token overlap against the query; the semantic
//! half is cosine similarity mapped into [0, 1].

use std::collections::HashSet;

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Fraction of distinct query tokens present in the document, in [0, 1].
pub fn keyword_score(query: &str, document: &str) -> f32 {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens: HashSet<String> = tokenize(document).into_iter().collect();
    let overlap = query_tokens.intersection(&doc_tokens).count();
    overlap as f32 / query_tokens.len() as f32
}

/// Cosine similarity mapped from [-1, 1] into [0, 1]. Mismatched or empty
/// vectors score 0.
pub fn semantic_score(query: &[f32], record: &[f32]) -> f32 {
    if query.is_empty() || query.len() != record.len() {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(record).map(|(a, b)| a * b).sum();
    let norm_q: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_r: f32 = record.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_q == 0.0 || norm_r == 0.0 {
        return 0.0;
    }
    let cosine = (dot / (norm_q * norm_r)).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

pub fn combined_score(alpha: f32, semantic: f32, keyword: f32) -> f32 {
    alpha * semantic + (1.0 - alpha) * keyword
}
