use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::VaultError;
use crate::models::EdgeKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexDirConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            index: IndexDirConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            reranker: RerankerConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexDirConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexDirConfig {
    fn default() -> Self {
        IndexDirConfig {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".mdvault"),
        None => PathBuf::from(".mdvault"),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `"structural"` or `"ner"`. Structural extraction always runs; `"ner"`
    /// additionally runs the zero-shot NER backend.
    #[serde(default = "default_depth")]
    pub depth: String,
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
    /// NER predictions below this confidence are discarded.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,
    /// HTTP endpoint of the zero-shot NER backend.
    #[serde(default)]
    pub ner_url: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            depth: default_depth(),
            entity_types: default_entity_types(),
            score_floor: default_score_floor(),
            ner_url: None,
        }
    }
}

fn default_depth() -> String {
    "structural".to_string()
}
fn default_entity_types() -> Vec<String> {
    ["person", "organization", "technology", "concept", "location"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_score_floor() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"` (fastembed ONNX) or `"hash"` (deterministic, model-free).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_embedding_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model")]
    pub model: String,
    /// How many fused candidates are rescored by the cross-encoder.
    #[serde(default = "default_rerank_pool")]
    pub pool_size: usize,
    /// Candidates with an adjusted score below this are dropped.
    #[serde(default = "default_rerank_floor")]
    pub score_floor: f32,
    /// Chunks shorter than this (in characters) receive a length penalty.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        RerankerConfig {
            model: default_reranker_model(),
            pool_size: default_rerank_pool(),
            score_floor: default_rerank_floor(),
            min_length: default_min_length(),
        }
    }
}

fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}
fn default_rerank_pool() -> usize {
    100
}
fn default_rerank_floor() -> f32 {
    -8.0
}
fn default_min_length() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// RRF smoothing constant.
    #[serde(default = "default_fusion_k")]
    pub fusion_k: u32,
    /// Maximum seed chunks handed to the graph retriever.
    #[serde(default = "default_seed_budget")]
    pub seed_budget: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
    #[serde(default = "default_edge_weights")]
    pub edge_weights: BTreeMap<String, f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            default_top_k: default_top_k(),
            fusion_k: default_fusion_k(),
            seed_budget: default_seed_budget(),
            max_hops: default_max_hops(),
            edge_weights: default_edge_weights(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_fusion_k() -> u32 {
    60
}
fn default_seed_budget() -> usize {
    20
}
fn default_max_hops() -> u8 {
    2
}
fn default_edge_weights() -> BTreeMap<String, f32> {
    let mut weights = BTreeMap::new();
    weights.insert(EdgeKind::LinksTo.as_str().to_string(), 1.0);
    weights.insert(EdgeKind::Mentions.as_str().to_string(), 0.8);
    weights.insert(EdgeKind::ParentOf.as_str().to_string(), 0.6);
    weights.insert(EdgeKind::HasTag.as_str().to_string(), 0.5);
    weights.insert(EdgeKind::CoOccurs.as_str().to_string(), 0.4);
    weights
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

impl Config {
    pub fn metadata_path(&self) -> PathBuf {
        self.index.dir.join("metadata.db")
    }
    pub fn vectors_dir(&self) -> PathBuf {
        self.index.dir.join("vectors")
    }
    pub fn graphdb_dir(&self) -> PathBuf {
        self.index.dir.join("graphdb")
    }
    pub fn bm25_path(&self) -> PathBuf {
        self.index.dir.join("bm25_index.json")
    }
    pub fn manifest_path(&self) -> PathBuf {
        self.index.dir.join("config.json")
    }
    pub fn acronyms_path(&self) -> PathBuf {
        self.index.dir.join("acronyms.json")
    }
}

/// Load and validate configuration from a TOML file.
///
/// A missing file yields the built-in defaults; a present but invalid file
/// is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    match config.extraction.depth.as_str() {
        "structural" | "ner" => {}
        other => anyhow::bail!(
            "Unknown extraction depth: '{}'. Must be structural or ner.",
            other
        ),
    }
    match config.embedding.provider.as_str() {
        "local" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local or hash.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.retrieval.default_top_k == 0 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if config.extraction.depth == "ner" && config.extraction.entity_types.is_empty() {
        anyhow::bail!("extraction.entity_types must not be empty when depth = ner");
    }
    Ok(())
}

/// The frozen identity of an index, written to `config.json` in the index
/// directory when the index is built.
///
/// A query against an index whose manifest disagrees with the configured
/// embedding model is a fatal [`VaultError::ModelMismatch`]: retrieval
/// quality silently collapses when query vectors and index vectors come from
/// different models, so mdvault refuses rather than migrates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub reranker_model: String,
    /// Token estimator parameter used by the chunker and the BM25 builder.
    pub chars_per_token: usize,
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub edge_weights: BTreeMap<String, f32>,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn from_config(config: &Config) -> Self {
        IndexManifest {
            embedding_model: config.embedding.model.clone(),
            embedding_dims: config.embedding.dims,
            reranker_model: config.reranker.model.clone(),
            chars_per_token: crate::text::CHARS_PER_TOKEN,
            max_chunk_tokens: config.chunking.max_tokens,
            overlap_tokens: config.chunking.overlap_tokens,
            bm25_k1: crate::sparse::DEFAULT_K1,
            bm25_b: crate::sparse::DEFAULT_B,
            edge_weights: config.retrieval.edge_weights.clone(),
            built_at: Utc::now(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), VaultError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| VaultError::Storage(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Option<Self>, VaultError> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| VaultError::Storage(e.to_string()))?;
        let manifest = serde_json::from_str(&content)
            .map_err(|e| VaultError::Storage(format!("corrupt index manifest: {}", e)))?;
        Ok(Some(manifest))
    }

    /// Refuse queries against an index built with a different embedding model.
    pub fn check_model(&self, config: &Config) -> Result<(), VaultError> {
        if self.embedding_model != config.embedding.model
            || self.embedding_dims != config.embedding.dims
        {
            return Err(VaultError::ModelMismatch {
                indexed: format!("{} ({}d)", self.embedding_model, self.embedding_dims),
                configured: format!("{} ({}d)", config.embedding.model, config.embedding.dims),
            });
        }
        Ok(())
    }
}
