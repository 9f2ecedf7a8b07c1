//! Sparse retriever: BM25 over the serialised index.

use crate::error::VaultError;
use crate::sparse::SparseIndex;

/// Score the expanded query against the BM25 index. The index may be
/// absent (nothing indexed yet, or bm25 mode never built) — that is an
/// empty result, not an error.
pub fn search(
    index: Option<&SparseIndex>,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, f32)>, VaultError> {
    match index {
        Some(index) => Ok(index.search(query, limit)),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_index_is_empty() {
        assert!(search(None, "anything", 10).unwrap().is_empty());
    }

    #[test]
    fn test_delegates_to_index() {
        let chunks = vec![("c0".to_string(), "hybrid retrieval engine".to_string())];
        let index = SparseIndex::build(&chunks, crate::sparse::DEFAULT_K1, crate::sparse::DEFAULT_B);
        let hits = search(Some(&index), "retrieval", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c0");
    }
}
