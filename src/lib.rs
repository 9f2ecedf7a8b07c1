//! # mdvault
//!
//! **Local-first hybrid retrieval over Markdown vaults.**
//!
//! mdvault indexes a directory of Markdown documents into three coordinated
//! indices — a dense vector store, a sparse BM25 index, and a property graph —
//! and answers natural-language queries by fanning out across all three,
//! fusing the ranked lists by reciprocal rank, and reranking the top
//! candidates with a cross-encoder. Everything runs on the local machine;
//! query time makes no network calls.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────────────┐
//! │  Reader  │──▶│   Chunker +   │──▶│  metadata.db (SQLite) │
//! │ .md walk │   │  Extractors   │   │  vectors/   (blobs)   │
//! └──────────┘   └───────────────┘   │  graphdb/   (nodes)   │
//!                                    │  bm25_index.json      │
//!                                    └──────────┬────────────┘
//!                                               │
//!                   ┌───────────────────────────┤
//!                   ▼                           ▼
//!              ┌─────────┐                ┌──────────┐
//!              │   CLI   │                │   HTTP   │
//!              │  (mdv)  │                │ (/tools) │
//!              └─────────┘                └──────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **reader** ([`reader`]) walks the vault and produces
//!    [`models::FileInfo`]s with content checksums.
//! 2. The **chunker** ([`chunker`]) splits each file into heading-scoped,
//!    token-bounded [`models::Chunk`]s with deterministic IDs.
//! 3. **Extractors** ([`extract`]) emit entities and relations from each
//!    chunk: structural (wikilinks, tags, frontmatter, headings) always,
//!    zero-shot NER optionally.
//! 4. The **indexer** ([`indexer`]) writes chunks, vectors, tokens, and graph
//!    rows in an order that never leaves a dangling cross-store reference.
//! 5. At query time the **expander** ([`expand`]) rewrites the query, the
//!    three **retrievers** ([`search`]) run concurrently, results are fused
//!    by RRF and reranked by a cross-encoder.
//!
//! ## Search modes
//!
//! | Mode | Engines |
//! |------|---------|
//! | `semantic` | dense vectors only |
//! | `bm25` | sparse BM25 only |
//! | `graph` | graph traversal (seeded by dense + sparse) |
//! | `hybrid` | all three, fused by reciprocal rank |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the frozen index manifest |
//! | [`error`] | Error kinds shared across the pipeline |
//! | [`models`] | Core data types: `FileInfo`, `Chunk`, `Entity`, `SearchResult` |
//! | [`text`] | Tokeniser, stop list, sentence splitter |
//! | [`reader`] | Vault discovery: walk, title, checksum, mtime |
//! | [`chunker`] | Heading-scoped chunking with sentence-window splitting |
//! | [`extract`] | Structural and NER extraction, acronym harvesting |
//! | [`embedding`] | Embedding provider trait and local implementations |
//! | [`rerank`] | Cross-encoder scoring with length penalty and score floor |
//! | [`store`] | Metadata, vector, and graph stores |
//! | [`sparse`] | Serialised BM25 index |
//! | [`expand`] | Query expansion: acronyms and heading structure |
//! | [`search`] | Retrievers, reciprocal rank fusion, result hydration |
//! | [`indexer`] | Batch ingestion with per-file rollback |
//! | [`service`] | High-level facade: `index`, `search`, `status`, `clear` |
//! | [`server`] | HTTP tool server for MCP-style clients |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod expand;
pub mod extract;
pub mod indexer;
pub mod models;
pub mod reader;
pub mod rerank;
pub mod search;
pub mod server;
pub mod service;
pub mod sparse;
pub mod store;
pub mod text;
