//! Cross-encoder reranking: joint `(query, passage)` scoring with a length
//! penalty and a score floor.
//!
//! The cross-encoder reads the query and the passage together, which is
//! slower but considerably more accurate than dual-encoder similarity; it
//! only ever sees the top fused candidates. Raw logit scores are adjusted
//! before ranking:
//!
//! - chunks shorter than `min_length` characters are multiplied by
//!   `0.5 + 0.5 · (len / min_length)` — keyword-dense stubs (navigation
//!   tables, link lists) otherwise outrank real content;
//! - candidates with an adjusted score below `score_floor` are dropped
//!   entirely.

use std::sync::Arc;

use crate::config::RerankerConfig;
use crate::error::VaultError;

/// Contract for the cross-encoder backend. Scores are raw model logits in
/// input order, one per passage.
pub trait CrossScorer: Send + Sync {
    fn model_name(&self) -> &str;
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, VaultError>;
}

/// Create the configured cross-encoder.
pub fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn CrossScorer>, VaultError> {
    #[cfg(feature = "local-models")]
    {
        local::LocalReranker::shared(&config.model)
    }
    #[cfg(not(feature = "local-models"))]
    {
        let _ = config;
        Err(VaultError::Config(
            "reranking requires the local-models feature; pass rerank=false".into(),
        ))
    }
}

/// Apply the length penalty and score floor to raw cross-encoder scores.
/// Returns `(index, adjusted_score)` pairs for the survivors, sorted by
/// descending adjusted score.
pub fn adjust_scores(
    raw_scores: &[f32],
    passage_lengths: &[usize],
    config: &RerankerConfig,
) -> Vec<(usize, f32)> {
    let mut adjusted: Vec<(usize, f32)> = raw_scores
        .iter()
        .zip(passage_lengths)
        .enumerate()
        .filter_map(|(idx, (&score, &len))| {
            let score = if len < config.min_length {
                let factor = 0.5 + 0.5 * (len as f32 / config.min_length as f32);
                score * factor
            } else {
                score
            };
            (score >= config.score_floor).then_some((idx, score))
        })
        .collect();

    adjusted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    adjusted
}

#[cfg(feature = "local-models")]
mod local {
    use std::sync::{Arc, Mutex, OnceLock};

    use crate::error::VaultError;

    use super::CrossScorer;

    fn resolve_model(name: &str) -> Result<fastembed::RerankerModel, VaultError> {
        match name {
            "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
            "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
            other => Err(VaultError::Config(format!(
                "unknown reranker model: '{}'. Supported: bge-reranker-base, \
                 jina-reranker-v1-turbo-en",
                other
            ))),
        }
    }

    /// Local cross-encoder. One instance per process, shared across
    /// queries; initialisation is serialised.
    pub struct LocalReranker {
        model: Mutex<fastembed::TextRerank>,
        model_name: String,
    }

    static SHARED: OnceLock<Mutex<Option<Arc<LocalReranker>>>> = OnceLock::new();

    impl LocalReranker {
        pub fn shared(model_name: &str) -> Result<Arc<dyn CrossScorer>, VaultError> {
            let slot = SHARED.get_or_init(|| Mutex::new(None));
            let mut guard = slot
                .lock()
                .map_err(|_| VaultError::Model("reranker lock poisoned".into()))?;

            if let Some(existing) = guard.as_ref() {
                if existing.model_name == model_name {
                    return Ok(existing.clone());
                }
                return Err(VaultError::Model(format!(
                    "reranker model '{}' already loaded in this process; cannot switch to '{}'",
                    existing.model_name, model_name
                )));
            }

            let registry_model = resolve_model(model_name)?;
            let model = fastembed::TextRerank::try_new(
                fastembed::RerankInitOptions::new(registry_model).with_show_download_progress(false),
            )
            .map_err(|e| VaultError::Model(format!("failed to load reranker: {}", e)))?;

            let reranker = Arc::new(LocalReranker {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
            });
            *guard = Some(reranker.clone());
            Ok(reranker)
        }
    }

    impl CrossScorer for LocalReranker {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, VaultError> {
            if passages.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self
                .model
                .lock()
                .map_err(|_| VaultError::Model("reranker lock poisoned".into()))?;
            let documents: Vec<&str> = passages.iter().map(String::as_str).collect();
            let results = model
                .rerank(query, documents, false, None)
                .map_err(|e| VaultError::Model(format!("rerank failed: {}", e)))?;

            // fastembed returns results sorted by score; restore input order.
            let mut scores = vec![0.0f32; passages.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RerankerConfig {
        RerankerConfig::default()
    }

    #[test]
    fn test_length_penalty_short_chunk() {
        // 40-char chunk scoring 3.0 → 3.0 × (0.5 + 0.5 × 0.4) = 2.1
        let adjusted = adjust_scores(&[3.0], &[40], &config());
        assert_eq!(adjusted.len(), 1);
        assert!((adjusted[0].1 - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_no_penalty_at_or_above_min_length() {
        let adjusted = adjust_scores(&[3.0, 2.0], &[100, 400], &config());
        assert!((adjusted[0].1 - 3.0).abs() < 1e-6);
        assert!((adjusted[1].1 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_floor_drops_everything() {
        let adjusted = adjust_scores(&[-9.0, -12.5, -8.01], &[200, 200, 200], &config());
        assert!(adjusted.is_empty());
    }

    #[test]
    fn test_floor_applied_after_penalty() {
        // Raw -10.0 on a 50-char chunk: -10.0 × 0.75 = -7.5, above the floor.
        let adjusted = adjust_scores(&[-10.0], &[50], &config());
        assert_eq!(adjusted.len(), 1);
        assert!((adjusted[0].1 + 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_descending_with_stable_ties() {
        let adjusted = adjust_scores(&[1.0, 5.0, 5.0], &[200, 200, 200], &config());
        let order: Vec<usize> = adjusted.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
