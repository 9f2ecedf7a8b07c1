//! Core data models used throughout mdvault.
//!
//! These types represent the files, chunks, entities, and search results that
//! flow through the ingestion and retrieval pipeline:
//!
//! ```text
//! walk → FileInfo → chunk_file() → Chunk ──▶ embed() → vectors
//!                        │                ├─▶ tokenize() → BM25
//!                        └─ extract() ────┴─▶ Entity / Relation → graph
//!                                                     │
//!                                         search() → SearchResult
//! ```
//!
//! Identity is deterministic everywhere: a chunk ID is a 128-bit hash of
//! `file_path:ordinal` and an entity ID hashes the normalised name plus
//! kind. Re-indexing an unchanged file therefore reproduces byte-identical
//! IDs across all stores.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::VaultError;

/// Hex-encode the first 16 bytes (128 bits) of a SHA-256 digest.
pub fn short_hash(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Deterministic chunk identifier from file path and ordinal.
pub fn chunk_id(file_path: &Path, ordinal: i64) -> String {
    short_hash(format!("{}:{}", file_path.display(), ordinal).as_bytes())
}

/// Canonical form used for entity identity: trimmed, case-folded,
/// internal whitespace collapsed.
pub fn normalize_entity_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Metadata about a discovered markdown file.
///
/// The path is the primary identity; the checksum is a content hash used to
/// detect changes between indexing runs. When the checksum of a known file
/// changes, all of its chunks are removed from every store before the new
/// chunks are written.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// First level-1 heading, or the filename stem if there is none.
    pub title: String,
    /// 128-bit content hash (hex).
    pub checksum: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
}

/// A heading-scoped, token-bounded passage: the unit of retrieval.
///
/// A chunk belongs to exactly one file and one section. Its ID is stable
/// across re-indexings of unchanged files, which is what keeps the four
/// stores referentially consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier: `short_hash(file_path:ordinal)`.
    pub id: String,
    /// Owning file.
    pub file_path: PathBuf,
    /// Zero-based position within the file's chunk sequence.
    pub ordinal: i64,
    /// Ancestor headings from H1 down to the chunk's own heading.
    pub heading_path: Vec<String>,
    /// Heading level of the chunk's section (0 for preamble text).
    pub level: u8,
    /// Chunk text, prefixed with the joined heading path.
    pub text: String,
    /// Byte offset of the section start in the source file.
    pub start_byte: usize,
    /// Byte offset of the section end in the source file.
    pub end_byte: usize,
    /// Estimated token count of `text`.
    pub tokens: usize,
}

impl Chunk {
    /// The chunk's own heading (last element of the heading path).
    pub fn heading(&self) -> &str {
        self.heading_path.last().map(String::as_str).unwrap_or("")
    }

    /// Heading path joined for display: `"A > B > C"`.
    pub fn heading_path_joined(&self) -> String {
        self.heading_path.join(" > ")
    }
}

/// Entity type tag. The core set is closed; index-time configuration can
/// add extra labels which are carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Person,
    Organization,
    Technology,
    Concept,
    Location,
    /// A wikilink or markdown-link target.
    Link,
    /// A frontmatter value, tagged with its key.
    Frontmatter(String),
    /// A configured NER label outside the core set.
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Organization => "organization",
            EntityKind::Technology => "technology",
            EntityKind::Concept => "concept",
            EntityKind::Location => "location",
            EntityKind::Link => "link",
            EntityKind::Frontmatter(key) => key,
            EntityKind::Other(label) => label,
        }
    }

    /// Map an NER label back onto the tagged union.
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "person" => EntityKind::Person,
            "organization" => EntityKind::Organization,
            "technology" => EntityKind::Technology,
            "concept" => EntityKind::Concept,
            "location" => EntityKind::Location,
            "link" => EntityKind::Link,
            other => EntityKind::Other(other.to_string()),
        }
    }
}

/// A named thing extracted from a chunk. Entities are global across the
/// corpus: two mentions that normalise to the same name and kind share an ID.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Deterministic identifier: `short_hash(normalised_name|kind)`.
    pub id: String,
    /// Canonical (display) name.
    pub name: String,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(name: &str, kind: EntityKind) -> Self {
        let id = short_hash(
            format!("{}|{}", normalize_entity_name(name), kind.as_str()).as_bytes(),
        );
        Entity {
            id,
            name: name.to_string(),
            kind,
        }
    }
}

/// A hashtag or frontmatter tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Normalised tag string, used directly as the node ID.
    pub id: String,
    /// Tag string as written in the source.
    pub raw: String,
}

impl Tag {
    pub fn new(raw: &str) -> Self {
        Tag {
            id: raw.trim().to_lowercase(),
            raw: raw.to_string(),
        }
    }
}

/// Edge kinds of the property graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    HasSection,
    ParentOf,
    LinksTo,
    HasTag,
    Mentions,
    CoOccurs,
    HasFrontmatter,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::HasSection => "HAS_SECTION",
            EdgeKind::ParentOf => "PARENT_OF",
            EdgeKind::LinksTo => "LINKS_TO",
            EdgeKind::HasTag => "HAS_TAG",
            EdgeKind::Mentions => "MENTIONS",
            EdgeKind::CoOccurs => "CO_OCCURS",
            EdgeKind::HasFrontmatter => "HAS_FRONTMATTER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HAS_SECTION" => Some(EdgeKind::HasSection),
            "PARENT_OF" => Some(EdgeKind::ParentOf),
            "LINKS_TO" => Some(EdgeKind::LinksTo),
            "HAS_TAG" => Some(EdgeKind::HasTag),
            "MENTIONS" => Some(EdgeKind::Mentions),
            "CO_OCCURS" => Some(EdgeKind::CoOccurs),
            "HAS_FRONTMATTER" => Some(EdgeKind::HasFrontmatter),
            _ => None,
        }
    }
}

/// A directed edge between two graph nodes, identified by their stable IDs.
#[derive(Debug, Clone)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub kind: EdgeKind,
    pub weight: f32,
}

impl Relation {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, kind: EdgeKind) -> Self {
        Relation {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// Output of an extractor: the entities, tags, and relations found in one
/// file's chunks.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub tags: Vec<Tag>,
    pub relations: Vec<Relation>,
    /// Titles of link targets that did not resolve to a known file. The
    /// indexer materialises these as synthetic File nodes so the pending
    /// edges have something to point at.
    pub synthetic_files: Vec<String>,
}

impl ExtractionResult {
    pub fn merge(&mut self, other: ExtractionResult) {
        self.entities.extend(other.entities);
        self.tags.extend(other.tags);
        self.relations.extend(other.relations);
        self.synthetic_files.extend(other.synthetic_files);
    }
}

/// Retrieval strategy selected per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Bm25,
    Graph,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Bm25 => "bm25",
            SearchMode::Graph => "graph",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "bm25" => Ok(SearchMode::Bm25),
            "graph" => Ok(SearchMode::Graph),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(VaultError::Config(format!(
                "unknown search mode '{}'; use semantic, bm25, graph, or hybrid",
                other
            ))),
        }
    }
}

/// A single search result after fusion and optional reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_path: PathBuf,
    /// Heading path joined for display: `"A > B > C"`.
    pub heading_path: String,
    /// Excerpt centred on the strongest query-term overlap.
    pub snippet: String,
    /// Final score: RRF score, or the adjusted cross-encoder score when
    /// reranking ran.
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_score: Option<f32>,
    /// Engines whose ranked lists contained this chunk.
    pub matched_engines: Vec<String>,
}

/// Summary statistics about the current index, persisted in the metadata
/// store so `status()` works across processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: u64,
    pub chunks: u64,
    pub entities: u64,
    pub edges: u64,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// A file that failed during batch ingestion, with the step it reached.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Result of a batch index run: the persisted stats plus any per-file
/// failures that were recovered locally.
#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    pub stats: IndexStats,
    pub failures: Vec<FileFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id(Path::new("/vault/foo.md"), 0);
        let b = chunk_id(Path::new("/vault/foo.md"), 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_chunk_id_varies_with_ordinal() {
        let a = chunk_id(Path::new("/vault/foo.md"), 0);
        let b = chunk_id(Path::new("/vault/foo.md"), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_id_stable_under_normalisation() {
        let a = Entity::new("Neural  Networks", EntityKind::Concept);
        let b = Entity::new("neural networks", EntityKind::Concept);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_entity_id_varies_with_kind() {
        let a = Entity::new("Mercury", EntityKind::Concept);
        let b = Entity::new("Mercury", EntityKind::Technology);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fulltext".parse::<SearchMode>().is_err());
    }

    #[test]
    fn test_edge_kind_roundtrip() {
        for kind in [
            EdgeKind::HasSection,
            EdgeKind::ParentOf,
            EdgeKind::LinksTo,
            EdgeKind::HasTag,
            EdgeKind::Mentions,
            EdgeKind::CoOccurs,
            EdgeKind::HasFrontmatter,
        ] {
            assert_eq!(EdgeKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
