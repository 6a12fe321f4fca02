//! Maximal marginal relevance re-ranking of retrieved chunks.
//!
//! MMR trades query similarity against similarity to chunks already picked:
//!
//! `score = λ × sim(query, doc) - (1 - λ) × max(sim(doc, selected))`

/// Balance between relevance (1.0) and diversity (0.0)
pub const MMR_LAMBDA: f32 = 0.5;

/// Candidates fetched from the store per requested result
pub const FETCH_MULTIPLIER: usize = 2;

/// Cosine similarity; mismatched or zero-length vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    dot_product / denominator
}

/// Greedily pick `k` candidate indices by MMR, best first.
///
/// The first pick is always the candidate most similar to the query. Ties go
/// to the earlier candidate, so store order breaks them.
pub fn mmr_select(query: &[f32], candidates: &[Vec<f32>], k: usize, lambda: f32) -> Vec<usize> {
    let lambda = lambda.clamp(0.0, 1.0);
    let k = k.min(candidates.len());

    let query_similarity: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k {
        let mut best_position = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (position, &candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&chosen| cosine_similarity(&candidates[candidate], &candidates[chosen]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda * query_similarity[candidate] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }

        selected.push(remaining.remove(best_position));
    }

    selected
}
