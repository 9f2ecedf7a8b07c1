//! Serialised BM25 index over chunk tokens.
//!
//! BM25 IDF needs a full corpus view, so the index is rebuilt at the end of
//! every ingestion batch rather than maintained per chunk, and persisted as
//! a JSON blob (`bm25_index.json`). The k1/b parameters are frozen into the
//! blob so a query always scores with the parameters the index was built
//! with.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::text::tokenize;

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

/// BM25 (Okapi) index: term postings, document lengths, and the chunk-ID
/// map tying document indices back to chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseIndex {
    k1: f32,
    b: f32,
    chunk_ids: Vec<String>,
    doc_lens: Vec<u32>,
    avg_doc_len: f32,
    /// term → (doc index, term frequency) postings.
    postings: HashMap<String, Vec<(u32, u32)>>,
}

impl SparseIndex {
    /// Tokenise and index the full corpus.
    pub fn build(chunks: &[(String, String)], k1: f32, b: f32) -> Self {
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();

        for (doc_idx, (chunk_id, text)) in chunks.iter().enumerate() {
            let tokens = tokenize(text);
            doc_lens.push(tokens.len() as u32);
            chunk_ids.push(chunk_id.clone());

            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_default() += 1;
            }
            for (term, tf) in freqs {
                postings.entry(term).or_default().push((doc_idx as u32, tf));
            }
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<u32>() as f32 / doc_lens.len() as f32
        };

        SparseIndex {
            k1,
            b,
            chunk_ids,
            doc_lens,
            avg_doc_len,
            postings,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Score the query against the corpus, returning up to `limit`
    /// `(chunk_id, score)` pairs by descending score. Only positive scores
    /// are returned; an empty token set yields an empty result.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f32)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.is_empty() {
            return Vec::new();
        }

        let n = self.chunk_ids.len() as f32;
        let mut scores = vec![0.0f32; self.chunk_ids.len()];

        for term in &query_tokens {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(doc_idx, tf) in postings {
                let tf = tf as f32;
                let doc_len = self.doc_lens[doc_idx as usize] as f32;
                let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_len.max(1.0));
                scores[doc_idx as usize] += idf * tf * (self.k1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked: Vec<(String, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| score > 0.0)
            .map(|(idx, &score)| (self.chunk_ids[idx].clone(), score))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn save(&self, path: &Path) -> Result<(), VaultError> {
        let json = serde_json::to_string(self).map_err(|e| VaultError::Storage(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| VaultError::Storage(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Option<Self>, VaultError> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| VaultError::Storage(e.to_string()))?;
        let index = serde_json::from_str(&content)
            .map_err(|e| VaultError::Storage(format!("corrupt BM25 index: {}", e)))?;
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[(&str, &str)]) -> SparseIndex {
        let chunks: Vec<(String, String)> = docs
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect();
        SparseIndex::build(&chunks, DEFAULT_K1, DEFAULT_B)
    }

    #[test]
    fn test_ranks_matching_doc_first() {
        let idx = index(&[
            ("deploy", "Deploying services to production with kubernetes"),
            ("cook", "Cooking pasta with tomatoes and basil"),
        ]);
        let hits = idx.search("deploy production", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "deploy");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn test_rarer_term_scores_higher() {
        let idx = index(&[
            ("a", "attention attention transformers"),
            ("b", "attention models everywhere"),
            ("c", "unrelated cooking text"),
        ]);
        let hits = idx.search("transformers", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let idx = index(&[("a", "some text")]);
        assert!(idx.search("", 10).is_empty());
        // Stop-word-only queries tokenise to nothing.
        assert!(idx.search("the of and", 10).is_empty());
    }

    #[test]
    fn test_no_match_returns_empty() {
        let idx = index(&[("a", "alpha beta gamma")]);
        assert!(idx.search("zeppelin", 10).is_empty());
    }

    #[test]
    fn test_limit_respected() {
        let idx = index(&[
            ("a", "rust search"),
            ("b", "rust index"),
            ("c", "rust vault"),
        ]);
        let hits = idx.search("rust", 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_roundtrip_preserves_parameters_and_scores() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bm25_index.json");
        let idx = index(&[("a", "hybrid retrieval engine"), ("b", "note taking")]);
        idx.save(&path).unwrap();

        let loaded = SparseIndex::load(&path).unwrap().expect("index present");
        assert_eq!(loaded.k1, DEFAULT_K1);
        assert_eq!(loaded.b, DEFAULT_B);
        assert_eq!(idx.search("retrieval", 5), loaded.search("retrieval", 5));
    }

    #[test]
    fn test_missing_file_loads_none() {
        assert!(SparseIndex::load(Path::new("/nope/bm25_index.json"))
            .unwrap()
            .is_none());
    }
}
