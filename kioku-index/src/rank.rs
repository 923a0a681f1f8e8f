//! # Exact Ranking
//!
//! Brute-force scoring of a query against every candidate.
//!
//! Order is fully deterministic: score descending, then id ascending. For
//! `limit < n` only the top `limit` are sorted (`select_nth_unstable_by`
//! partitions first), which keeps top-k cheap on large stores.

use std::cmp::Ordering;

use kioku_core::SearchHit;

use crate::simd::cosine_similarity;

/// Rank order: higher score first, ties by ascending id
#[inline]
pub fn compare_hits(a_id: &str, a_score: f32, b_id: &str, b_score: f32) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a_id.cmp(b_id))
}

/// Score every candidate against `query` and return the best `limit`.
///
/// `limit == 0` yields nothing; a `limit` above the candidate count returns
/// them all. Candidate vectors must have the query's length.
pub fn rank<'a, I, V>(query: &[f32], candidates: I, limit: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: AsRef<[f32]>,
{
    if limit == 0 {
        return Vec::new();
    }

    let scored: Vec<(&'a str, f32)> = candidates
        .into_iter()
        .map(|(id, vector)| (id, cosine_similarity(query, vector.as_ref())))
        .collect();

    top_k(scored, limit)
}

/// Sort pre-scored candidates and keep the best `limit`
pub fn top_k(mut scored: Vec<(&str, f32)>, limit: usize) -> Vec<SearchHit> {
    if limit == 0 || scored.is_empty() {
        return Vec::new();
    }

    let cmp = |a: &(&str, f32), b: &(&str, f32)| compare_hits(a.0, a.1, b.0, b.1);

    if limit < scored.len() {
        scored.select_nth_unstable_by(limit - 1, cmp);
        scored.truncate(limit);
    }
    scored.sort_unstable_by(cmp);

    scored
        .into_iter()
        .map(|(id, score)| SearchHit::new(id, score))
        .collect()
}
