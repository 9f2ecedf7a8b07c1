//! Graph retriever: expand seed chunks through the knowledge graph.
//!
//! Unlike the dense and sparse engines this one never sees the query text.
//! It starts from seed chunk IDs (the union of the other engines' top
//! results, capped by the seed budget) and walks `MENTIONS`, `CO_OCCURS`,
//! `LINKS_TO`, `HAS_TAG`, and `PARENT_OF` edges up to two hops, scoring
//! every reached chunk with `Σ edge_weight / hop²`.

use crate::error::VaultError;
use crate::models::EdgeKind;
use crate::store::graph::GraphStore;

/// Edge kinds the retriever traverses. Ownership edges (`HAS_SECTION`,
/// `HAS_FRONTMATTER`) are deliberately absent: they would connect every
/// chunk of a file to every other and drown the signal.
pub const TRAVERSAL_EDGES: [EdgeKind; 5] = [
    EdgeKind::Mentions,
    EdgeKind::CoOccurs,
    EdgeKind::LinksTo,
    EdgeKind::HasTag,
    EdgeKind::ParentOf,
];

/// Take the union of dense and sparse results as traversal seeds, in rank
/// order, capped at `budget`.
pub fn collect_seeds(
    dense: &[(String, f32)],
    sparse: &[(String, f32)],
    budget: usize,
) -> Vec<String> {
    let mut seeds: Vec<String> = Vec::new();
    for (chunk_id, _) in dense.iter().chain(sparse.iter()) {
        if seeds.len() >= budget {
            break;
        }
        if !seeds.contains(chunk_id) {
            seeds.push(chunk_id.clone());
        }
    }
    seeds
}

/// Traverse from `seeds` and return up to `limit` chunks by graph score.
/// No seeds → empty result.
pub async fn search(
    store: &GraphStore,
    seeds: &[String],
    max_hops: u8,
    limit: usize,
) -> Result<Vec<(String, f32)>, VaultError> {
    if seeds.is_empty() {
        return Ok(Vec::new());
    }
    store.traverse(seeds, max_hops, &TRAVERSAL_EDGES, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(ids: &[&str]) -> Vec<(String, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 1.0 - i as f32 * 0.1))
            .collect()
    }

    #[test]
    fn test_seed_union_dedupes_and_caps() {
        let dense = ranked(&["a", "b", "c"]);
        let sparse = ranked(&["b", "d", "e"]);
        let seeds = collect_seeds(&dense, &sparse, 4);
        assert_eq!(seeds, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_seed_budget_zero() {
        let dense = ranked(&["a"]);
        assert!(collect_seeds(&dense, &[], 0).is_empty());
    }

    #[test]
    fn test_empty_seed_union() {
        assert!(collect_seeds(&[], &[], 20).is_empty());
    }
}
