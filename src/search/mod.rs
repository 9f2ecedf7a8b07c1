//! Query-side engines and result construction.
//!
//! Three retrievers share one contract — `(query, limit)` in, an ordered,
//! duplicate-free `[(chunk_id, engine_score)]` out — so the fusion layer
//! can combine them without caring which regime produced a score:
//!
//! | Engine | Module | Signal |
//! |--------|--------|--------|
//! | dense | [`semantic`] | cosine similarity over sentence embeddings |
//! | sparse | [`bm25`] | BM25 lexical match |
//! | graph | [`graph`] | connectivity to seed chunks |
//!
//! [`fusion`] merges the ranked lists by reciprocal rank; this module also
//! hydrates fused candidates into [`SearchResult`]s with snippets and
//! per-engine score attribution. Orchestration (mode dispatch, concurrent
//! retriever execution, reranking) lives in [`crate::service`].

pub mod bm25;
pub mod fusion;
pub mod graph;
pub mod semantic;

use std::collections::HashMap;

use crate::models::{Chunk, SearchResult};
use crate::text::{split_sentences, tokenize};

/// Maximum snippet length in characters.
pub const SNIPPET_LEN: usize = 240;

/// Build a snippet for a chunk: the sentence with the strongest query-term
/// overlap plus one sentence of context either side, else the chunk head.
/// Truncation is word-aware.
pub fn make_snippet(text: &str, query: &str) -> String {
    let query_terms: Vec<String> = tokenize(query);
    let sentences = split_sentences(text);

    let best = if query_terms.is_empty() {
        None
    } else {
        sentences
            .iter()
            .enumerate()
            .map(|(idx, sentence)| {
                let sentence_terms = tokenize(sentence);
                let overlap = query_terms
                    .iter()
                    .filter(|t| sentence_terms.contains(t))
                    .count();
                (idx, overlap)
            })
            .filter(|(_, overlap)| *overlap > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(idx, _)| idx)
    };

    let snippet = match best {
        Some(idx) if !sentences.is_empty() => {
            let from = idx.saturating_sub(1);
            let to = (idx + 1).min(sentences.len() - 1);
            sentences[from..=to].join(" ")
        }
        _ => text.to_string(),
    };

    truncate_words(snippet.replace('\n', " ").trim(), SNIPPET_LEN)
}

/// Truncate at a word boundary, appending an ellipsis when text was cut.
fn truncate_words(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &text[..cut];
    let cut = match truncated.rfind(' ') {
        // Only back up to the space if it does not cost too much text.
        Some(pos) if pos * 10 >= max_len * 8 => pos,
        _ => cut,
    };
    format!("{}...", truncated[..cut].trim_end())
}

/// Per-engine score lookup, used to attribute fused results.
pub struct EngineScores<'a> {
    lists: &'a [(&'a str, Vec<(String, f32)>)],
}

impl<'a> EngineScores<'a> {
    pub fn new(lists: &'a [(&'a str, Vec<(String, f32)>)]) -> Self {
        EngineScores { lists }
    }

    fn score_in(&self, engine: &str, chunk_id: &str) -> Option<f32> {
        self.lists
            .iter()
            .find(|(name, _)| *name == engine)
            .and_then(|(_, results)| {
                results
                    .iter()
                    .find(|(id, _)| id == chunk_id)
                    .map(|(_, score)| *score)
            })
    }
}

/// Hydrate `(chunk_id, final_score)` pairs into full results. Chunk IDs
/// missing from `chunks` (deleted between retrieval and hydration) are
/// skipped.
pub fn build_results(
    ranked: &[(String, f32)],
    chunks: &HashMap<String, Chunk>,
    engine_scores: &EngineScores<'_>,
    query: &str,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut results = Vec::with_capacity(top_k.min(ranked.len()));

    for (chunk_id, score) in ranked.iter().take(top_k) {
        let Some(chunk) = chunks.get(chunk_id) else {
            continue;
        };

        let semantic_score = engine_scores.score_in("semantic", chunk_id);
        let bm25_score = engine_scores.score_in("bm25", chunk_id);
        let graph_score = engine_scores.score_in("graph", chunk_id);

        let mut matched: Vec<String> = Vec::new();
        for (name, hit) in [
            ("bm25", bm25_score),
            ("graph", graph_score),
            ("semantic", semantic_score),
        ] {
            if hit.is_some() {
                matched.push(name.to_string());
            }
        }

        results.push(SearchResult {
            chunk_id: chunk_id.clone(),
            file_path: chunk.file_path.clone(),
            heading_path: chunk.heading_path_joined(),
            snippet: make_snippet(&chunk.text, query),
            score: *score,
            semantic_score,
            bm25_score,
            graph_score,
            matched_engines: matched,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: PathBuf::from("/vault/a.md"),
            ordinal: 0,
            heading_path: vec!["Deploy".to_string(), "Steps".to_string()],
            level: 2,
            text: text.to_string(),
            start_byte: 0,
            end_byte: text.len(),
            tokens: 1,
        }
    }

    #[test]
    fn test_snippet_centres_on_overlap() {
        let text = "Background first. Deployment uses kubernetes manifests. Cleanup last.";
        let snippet = make_snippet(text, "kubernetes");
        assert!(snippet.contains("kubernetes"));
        assert!(snippet.contains("Background"));
        assert!(snippet.contains("Cleanup"));
    }

    #[test]
    fn test_snippet_falls_back_to_head() {
        let text = "Opening sentence of the chunk. Second sentence follows here.";
        let snippet = make_snippet(text, "zeppelin");
        assert!(snippet.starts_with("Opening sentence"));
    }

    #[test]
    fn test_snippet_respects_length_cap() {
        let long = "word ".repeat(200);
        let snippet = make_snippet(&long, "");
        assert!(snippet.len() <= SNIPPET_LEN + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_build_results_attributes_engines() {
        let lists: Vec<(&str, Vec<(String, f32)>)> = vec![
            ("semantic", vec![("c0".to_string(), 0.9)]),
            ("bm25", vec![("c0".to_string(), 4.2), ("c1".to_string(), 2.0)]),
            ("graph", Vec::new()),
        ];
        let scores = EngineScores::new(&lists);
        let mut chunks = HashMap::new();
        chunks.insert("c0".to_string(), chunk("c0", "Deployment steps here."));
        chunks.insert("c1".to_string(), chunk("c1", "More about deployment."));

        let ranked = vec![("c0".to_string(), 0.032), ("c1".to_string(), 0.016)];
        let results = build_results(&ranked, &chunks, &scores, "deployment", 10);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "c0");
        assert_eq!(results[0].matched_engines, vec!["bm25", "semantic"]);
        assert_eq!(results[0].bm25_score, Some(4.2));
        assert_eq!(results[0].graph_score, None);
        assert_eq!(results[0].heading_path, "Deploy > Steps");
        assert_eq!(results[1].matched_engines, vec!["bm25"]);
    }

    #[test]
    fn test_build_results_skips_missing_chunks() {
        let lists: Vec<(&str, Vec<(String, f32)>)> = Vec::new();
        let scores = EngineScores::new(&lists);
        let chunks = HashMap::new();
        let ranked = vec![("ghost".to_string(), 1.0)];
        assert!(build_results(&ranked, &chunks, &scores, "q", 10).is_empty());
    }

    #[test]
    fn test_build_results_respects_top_k() {
        let lists: Vec<(&str, Vec<(String, f32)>)> = Vec::new();
        let scores = EngineScores::new(&lists);
        let mut chunks = HashMap::new();
        for i in 0..5 {
            let id = format!("c{}", i);
            chunks.insert(id.clone(), chunk(&id, "text here."));
        }
        let ranked: Vec<(String, f32)> =
            (0..5).map(|i| (format!("c{}", i), 1.0 - i as f32 * 0.1)).collect();
        assert_eq!(build_results(&ranked, &chunks, &scores, "q", 3).len(), 3);
    }
}
