//! Reciprocal Rank Fusion.
//!
//! Rank-only score combination: a chunk appearing at 1-based rank `r` in an
//! engine's list contributes `1 / (k + r)`, summed over the lists that
//! contain it (absence contributes nothing). Rank positions make scores
//! from cosine similarity, BM25, and graph traversal commensurable without
//! any normalisation.
//!
//! Ties are broken by the number of lists the chunk appeared in
//! (descending), then by chunk ID (ascending) — which also makes the output
//! independent of the order retrievers happened to finish in.

use std::collections::HashMap;

/// Maximum number of fused candidates handed to the reranker.
pub const FUSION_CANDIDATES: usize = 100;

/// Fuse ranked lists from multiple engines.
///
/// Input lists are `(engine_name, [(chunk_id, engine_score)])`, ordered by
/// descending engine score. Returns `(chunk_id, fused_score)` pairs sorted
/// by descending fused score, truncated to [`FUSION_CANDIDATES`].
pub fn fuse(lists: &[(&str, Vec<(String, f32)>)], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut appearances: HashMap<String, u32> = HashMap::new();

    for (_engine, results) in lists {
        for (rank0, (chunk_id, _score)) in results.iter().enumerate() {
            let rank = rank0 as f64 + 1.0;
            *scores.entry(chunk_id.clone()).or_default() += 1.0 / (k as f64 + rank);
            *appearances.entry(chunk_id.clone()).or_default() += 1;
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| appearances[&b.0].cmp(&appearances[&a.0]))
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(FUSION_CANDIDATES);
    fused
}
