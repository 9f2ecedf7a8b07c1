//! Dense retriever: embed the expanded query, cosine top-k against the
//! vector store.

use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::error::VaultError;
use crate::store::vector::VectorStore;

/// Encode `query` with the index-time embedding model and return up to
/// `limit` nearest chunks by cosine similarity. Empty queries return empty.
pub async fn search(
    embedder: Arc<dyn Embedder>,
    store: &VectorStore,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, f32)>, VaultError> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let owned = query.to_string();
    let vector = tokio::task::spawn_blocking(move || embed_query(embedder.as_ref(), &owned))
        .await
        .map_err(|e| VaultError::Model(e.to_string()))??;

    store.search(&vector, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::path::Path;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dense_retrieval_finds_overlapping_text() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128));

        let texts = [
            ("attn", "Transformers use attention mechanisms"),
            ("pasta", "Cooking pasta with fresh tomatoes"),
        ];
        let vectors = embedder
            .embed_batch(&texts.iter().map(|(_, t)| t.to_string()).collect::<Vec<_>>())
            .unwrap();
        let entries: Vec<(String, Vec<f32>)> = texts
            .iter()
            .zip(vectors)
            .map(|((id, _), v)| (id.to_string(), v))
            .collect();
        store
            .replace_for_file(Path::new("/vault/a.md"), &entries)
            .await
            .unwrap();

        let hits = search(embedder, &store, "attention mechanism", 2)
            .await
            .unwrap();
        assert_eq!(hits[0].0, "attn");
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path()).await.unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(16));
        assert!(search(embedder, &store, "   ", 5).await.unwrap().is_empty());
    }
}
