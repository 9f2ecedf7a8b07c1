//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two providers:
//! - **local** — runs a sentence-embedding model locally via fastembed; no
//!   network calls after the one-time model download. This is what real
//!   indexes use.
//! - **hash** — a deterministic token-hash projection. No model, no
//!   download; useful for CI and for exercising the pipeline end to end.
//!
//! The same model must encode both the corpus and the query: the model
//! identity and dimensionality are frozen into the index manifest, and a
//! mismatch at query time is a fatal `ModelMismatch`.
//!
//! Model weights load lazily once per process and are shared across
//! queries; initialisation is serialised behind a lock.
//!
//! Also provides the vector utilities shared with the vector store:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::VaultError;

/// Contract every embedding backend must satisfy. Implementations must be
/// thread-safe: the indexer calls them from a worker pool.
pub trait Embedder: Send + Sync {
    /// Model identifier frozen into the index manifest.
    fn model_name(&self) -> &str;
    /// Embedding dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError>;
}

/// Embed a single query string.
pub fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, VaultError> {
    let mut vectors = embedder.embed_batch(&[text.to_string()])?;
    vectors
        .pop()
        .ok_or_else(|| VaultError::Model("empty embedding response".into()))
}

/// Create the configured provider.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, VaultError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        #[cfg(feature = "local-models")]
        "local" => Ok(local::LocalEmbedder::shared(&config.model, config.batch_size)?),
        #[cfg(not(feature = "local-models"))]
        "local" => Err(VaultError::Config(
            "embedding provider 'local' requires the local-models feature".into(),
        )),
        other => Err(VaultError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hash provider ============

/// Deterministic, model-free embedder: each token hashes to a signed slot
/// and the result is L2-normalised. Cosine similarity then reflects token
/// overlap, which is enough to drive the dense path in tests and smoke
/// runs.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        HashEmbedder { dims }
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dims];
                for token in crate::text::tokenize(text) {
                    let digest = Sha256::digest(token.as_bytes());
                    let slot = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
                        as usize
                        % self.dims;
                    let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
                    vector[slot] += sign;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > f32::EPSILON {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }
}

// ============ Local provider (fastembed) ============

#[cfg(feature = "local-models")]
mod local {
    use std::sync::{Arc, Mutex, OnceLock};

    use crate::error::VaultError;

    use super::Embedder;

    /// Map a configured model name to the fastembed registry entry.
    fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize), VaultError> {
        match name {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
            "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
            other => Err(VaultError::Config(format!(
                "unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
                other
            ))),
        }
    }

    /// Local sentence embedder. One instance per process: weights are
    /// memory-mapped once and shared by every index and query call.
    pub struct LocalEmbedder {
        model: Mutex<fastembed::TextEmbedding>,
        model_name: String,
        dims: usize,
        batch_size: usize,
    }

    static SHARED: OnceLock<Mutex<Option<Arc<LocalEmbedder>>>> = OnceLock::new();

    impl LocalEmbedder {
        /// Return the process-wide instance, initialising it on first use.
        pub fn shared(model_name: &str, batch_size: usize) -> Result<Arc<Self>, VaultError> {
            let slot = SHARED.get_or_init(|| Mutex::new(None));
            let mut guard = slot
                .lock()
                .map_err(|_| VaultError::Model("embedder lock poisoned".into()))?;

            if let Some(existing) = guard.as_ref() {
                if existing.model_name == model_name {
                    return Ok(existing.clone());
                }
                return Err(VaultError::Model(format!(
                    "embedding model '{}' already loaded in this process; cannot switch to '{}'",
                    existing.model_name, model_name
                )));
            }

            let (registry_model, dims) = resolve_model(model_name)?;
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(registry_model).with_show_download_progress(false),
            )
            .map_err(|e| VaultError::Model(format!("failed to load embedding model: {}", e)))?;

            let embedder = Arc::new(LocalEmbedder {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
                dims,
                batch_size,
            });
            *guard = Some(embedder.clone());
            Ok(embedder)
        }
    }

    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self
                .model
                .lock()
                .map_err(|_| VaultError::Model("embedder lock poisoned".into()))?;
            model
                .embed(texts.to_vec(), Some(self.batch_size))
                .map_err(|e| VaultError::Model(format!("embedding failed: {}", e)))
        }
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder
            .embed_batch(&["transformers use attention".to_string()])
            .unwrap();
        let b = embedder
            .embed_batch(&["transformers use attention".to_string()])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn test_hash_embedder_similarity_tracks_overlap() {
        let embedder = HashEmbedder::new(128);
        let vectors = embedder
            .embed_batch(&[
                "attention mechanism in transformers".to_string(),
                "transformers use attention".to_string(),
                "pasta with tomatoes".to_string(),
            ])
            .unwrap();
        let related = cosine_similarity(&vectors[0], &vectors[1]);
        let unrelated = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }

    #[test]
    fn test_embed_query_returns_single_vector() {
        let embedder = HashEmbedder::new(32);
        let vector = embed_query(&embedder, "hello world").unwrap();
        assert_eq!(vector.len(), 32);
    }
}
