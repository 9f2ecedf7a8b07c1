//! Error kinds shared across the indexing and query pipelines.
//!
//! Batch ingestion recovers from the first three kinds locally (skip the
//! file, continue the batch); the remaining kinds are fatal for the call
//! that raised them.

use std::path::PathBuf;

use thiserror::Error;

/// The indexing step a file had reached when it failed.
///
/// Mirrors the per-file state machine:
/// `IDLE → DISCOVERED → CHUNKED → EMBEDDED → INDEXED`, with
/// `FAILED(step)` as the terminal state that rolls back partial work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStep {
    Discovered,
    Chunked,
    Embedded,
    Indexed,
}

impl std::fmt::Display for IndexStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexStep::Discovered => "discovered",
            IndexStep::Chunked => "chunked",
            IndexStep::Embedded => "embedded",
            IndexStep::Indexed => "indexed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O failure reading a source file. Recovered locally: the file is
    /// skipped and the batch continues.
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// Malformed frontmatter or similar. Recovered locally: the content is
    /// treated as opaque text and the batch continues.
    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A backing store failed during ingestion. The current file is rolled
    /// back; the batch continues and the failure is reported in the summary.
    #[error("index write failed for {} at step {step}: {message}", path.display())]
    IndexWrite {
        path: PathBuf,
        step: IndexStep,
        message: String,
    },

    /// The index was built with a different embedding model than the one
    /// configured for this query. Fatal; no automatic migration.
    #[error("index was built with model '{indexed}' but '{configured}' is configured; re-index or change embedding.model")]
    ModelMismatch { indexed: String, configured: String },

    /// A query arrived before any successful index. Fatal.
    #[error("no index found at {}; run `mdv index <directory>` first", .0.display())]
    IndexMissing(PathBuf),

    /// Deadline exceeded. Fatal for the call; no partial results.
    #[error("operation cancelled: deadline exceeded")]
    Cancelled,

    /// Invalid configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Storage backend failure outside the per-file ingestion path.
    #[error("storage error: {0}")]
    Storage(String),

    /// Model inference failure (embedder, cross-encoder, or NER backend).
    #[error("model error: {0}")]
    Model(String),
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
