//! High-level facade over the indexing and query pipelines.
//!
//! Callers see four synchronous-looking operations — `index`, `search`,
//! `status`, `clear` — and none of the store, extractor, or fusion
//! machinery. Both the CLI and the HTTP tool server are thin adapters over
//! this type.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, IndexManifest};
use crate::embedding::{create_embedder, Embedder};
use crate::error::VaultError;
use crate::expand::QueryExpander;
use crate::indexer::Indexer;
use crate::models::{IndexOutcome, IndexStats, SearchMode, SearchResult};
use crate::rerank::{adjust_scores, create_reranker};
use crate::search::fusion::{fuse, FUSION_CANDIDATES};
use crate::search::{bm25, build_results, graph, semantic, EngineScores};
use crate::sparse::SparseIndex;
use crate::store::graph::GraphStore;
use crate::store::metadata::MetadataStore;
use crate::store::vector::VectorStore;
use crate::text::CHARS_PER_TOKEN;

/// Options for one `search` call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// `None` falls back to the configured default top-K.
    pub top_k: Option<usize>,
    pub rerank: bool,
    pub expand: bool,
    pub deadline: Option<Instant>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            mode: SearchMode::Hybrid,
            top_k: None,
            rerank: true,
            expand: true,
            deadline: None,
        }
    }
}

pub struct VaultService {
    config: Config,
    metadata: Arc<MetadataStore>,
    vectors: Arc<VectorStore>,
    graph: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
}

impl VaultService {
    /// Open the service for indexing: stores are created as needed, and an
    /// existing manifest must agree with the configured embedding model.
    pub async fn open_for_index(config: Config) -> Result<Self, VaultError> {
        std::fs::create_dir_all(&config.index.dir)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        if let Some(manifest) = IndexManifest::load(&config.manifest_path())? {
            manifest.check_model(&config)?;
        }
        Self::open_stores(config).await
    }

    /// Open the service for querying: an index must already exist and its
    /// frozen model identity must match the configuration.
    pub async fn open(config: Config) -> Result<Self, VaultError> {
        let manifest = IndexManifest::load(&config.manifest_path())?
            .ok_or_else(|| VaultError::IndexMissing(config.index.dir.clone()))?;
        manifest.check_model(&config)?;
        Self::open_stores(config).await
    }

    async fn open_stores(config: Config) -> Result<Self, VaultError> {
        let metadata = Arc::new(MetadataStore::open(&config.metadata_path()).await?);
        let vectors = Arc::new(VectorStore::open(&config.vectors_dir()).await?);
        let graph = Arc::new(GraphStore::open(&config.graphdb_dir()).await?);
        let embedder = create_embedder(&config.embedding)?;
        Ok(VaultService {
            config,
            metadata,
            vectors,
            graph,
            embedder,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Index every Markdown file under `directory`.
    pub async fn index(
        &self,
        directory: &Path,
        deadline: Option<Instant>,
    ) -> Result<IndexOutcome, VaultError> {
        let indexer = Indexer::new(
            self.config.clone(),
            self.metadata.clone(),
            self.vectors.clone(),
            self.graph.clone(),
            self.embedder.clone(),
        );
        indexer.run(directory, deadline).await
    }

    /// Search the index. Empty queries return empty results without error.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, VaultError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let top_k = options.top_k.unwrap_or(self.config.retrieval.default_top_k);

        // -- Expansion (pure, dictionary-driven) ---------------------------
        let search_query = if options.expand {
            let acronyms = crate::extract::acronyms::load(&self.config.acronyms_path())?;
            let headings = self.metadata.heading_paths().await?;
            let expanded = QueryExpander::new(acronyms, &headings).expand(query);
            if !expanded.added_terms.is_empty() {
                tracing::debug!(
                    original = query,
                    expanded = %expanded.expanded_text,
                    "query expanded"
                );
            }
            expanded.expanded_text
        } else {
            query.to_string()
        };

        self.check_deadline(options.deadline)?;

        // -- Retrieval, concurrent per mode --------------------------------
        let sparse_index = if matches!(
            options.mode,
            SearchMode::Bm25 | SearchMode::Graph | SearchMode::Hybrid
        ) {
            SparseIndex::load(&self.config.bm25_path())?
        } else {
            None
        };

        let pool = FUSION_CANDIDATES;
        let mut lists: Vec<(&str, Vec<(String, f32)>)> = Vec::new();

        match options.mode {
            SearchMode::Semantic => {
                let dense =
                    semantic::search(self.embedder.clone(), &self.vectors, &search_query, pool)
                        .await?;
                lists.push(("semantic", dense));
            }
            SearchMode::Bm25 => {
                let sparse = bm25::search(sparse_index.as_ref(), &search_query, pool)?;
                lists.push(("bm25", sparse));
            }
            SearchMode::Graph => {
                // Graph-only mode still needs seeds from the other engines;
                // their own rankings are discarded.
                let (dense, sparse) = tokio::join!(
                    semantic::search(self.embedder.clone(), &self.vectors, &search_query, pool),
                    async { bm25::search(sparse_index.as_ref(), &search_query, pool) },
                );
                let seeds = graph::collect_seeds(
                    &dense?,
                    &sparse?,
                    self.config.retrieval.seed_budget,
                );
                let hits = graph::search(
                    &self.graph,
                    &seeds,
                    self.config.retrieval.max_hops,
                    pool,
                )
                .await?;
                lists.push(("graph", hits));
            }
            SearchMode::Hybrid => {
                let (dense, sparse) = tokio::join!(
                    semantic::search(self.embedder.clone(), &self.vectors, &search_query, pool),
                    async { bm25::search(sparse_index.as_ref(), &search_query, pool) },
                );
                let dense = dense?;
                let sparse = sparse?;
                let seeds = graph::collect_seeds(
                    &dense,
                    &sparse,
                    self.config.retrieval.seed_budget,
                );
                let graph_hits = graph::search(
                    &self.graph,
                    &seeds,
                    self.config.retrieval.max_hops,
                    pool,
                )
                .await?;
                lists.push(("semantic", dense));
                lists.push(("bm25", sparse));
                lists.push(("graph", graph_hits));
            }
        }

        self.check_deadline(options.deadline)?;

        // -- Fusion --------------------------------------------------------
        let fused = fuse(&lists, self.config.retrieval.fusion_k);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        // -- Optional cross-encoder rerank --------------------------------
        let ranked: Vec<(String, f32)> = if options.rerank {
            self.rerank(query, &fused, options.deadline).await?
        } else {
            fused
                .iter()
                .map(|(id, score)| (id.clone(), *score as f32))
                .collect()
        };

        // -- Hydration -----------------------------------------------------
        let ids: Vec<String> = ranked.iter().take(top_k).map(|(id, _)| id.clone()).collect();
        let chunks: HashMap<String, crate::models::Chunk> = self
            .metadata
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let engine_scores = EngineScores::new(&lists);
        Ok(build_results(&ranked, &chunks, &engine_scores, query, top_k))
    }

    /// Rescore the fused candidates with the cross-encoder, applying the
    /// length penalty and score floor.
    async fn rerank(
        &self,
        query: &str,
        fused: &[(String, f64)],
        deadline: Option<Instant>,
    ) -> Result<Vec<(String, f32)>, VaultError> {
        let pool_size = self.config.reranker.pool_size.min(fused.len());
        let ids: Vec<String> = fused[..pool_size].iter().map(|(id, _)| id.clone()).collect();
        let chunks = self.metadata.get_chunks(&ids).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        // Chunk text already leads with the joined heading path (the
        // chunker bakes it in), so it is the passage as-is, clipped to the
        // model input.
        let max_chars = self.config.chunking.max_tokens * CHARS_PER_TOKEN;
        let ordered: Vec<&crate::models::Chunk> = ids
            .iter()
            .filter_map(|id| chunks.iter().find(|c| &c.id == id))
            .collect();
        let passages: Vec<String> = ordered
            .iter()
            .map(|c| {
                let mut passage = c.text.clone();
                if passage.len() > max_chars {
                    let mut cut = max_chars;
                    while cut > 0 && !passage.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    passage.truncate(cut);
                }
                passage
            })
            .collect();
        let lengths: Vec<usize> = ordered.iter().map(|c| c.text.len()).collect();

        self.check_deadline(deadline)?;

        let scorer = create_reranker(&self.config.reranker)?;
        let owned_query = query.to_string();
        let raw = tokio::task::spawn_blocking(move || scorer.score(&owned_query, &passages))
            .await
            .map_err(|e| VaultError::Model(e.to_string()))??;

        let adjusted = adjust_scores(&raw, &lengths, &self.config.reranker);
        Ok(adjusted
            .into_iter()
            .map(|(idx, score)| (ordered[idx].id.clone(), score))
            .collect())
    }

    /// Current index statistics, or `None` before the first successful
    /// index.
    pub async fn status(&self) -> Result<Option<IndexStats>, VaultError> {
        self.metadata.get_stats().await
    }

    /// Remove all indexed data from every backing store.
    pub async fn clear(&self) -> Result<(), VaultError> {
        self.metadata.delete_all().await?;
        self.vectors.delete_all().await?;
        self.graph.delete_all().await?;
        for path in [
            self.config.bm25_path(),
            self.config.acronyms_path(),
            self.config.manifest_path(),
        ] {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| VaultError::Storage(e.to_string()))?;
            }
        }
        tracing::info!("all stores cleared");
        Ok(())
    }

    fn check_deadline(&self, deadline: Option<Instant>) -> Result<(), VaultError> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Err(VaultError::Cancelled),
            _ => Ok(()),
        }
    }
}
