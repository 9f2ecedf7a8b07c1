//! Backing stores for the four coordinated indices.
//!
//! Each store is an embedded database under the index directory; the core
//! requires only a small capability set from each:
//!
//! | Store | Backing | Capability set |
//! |-------|---------|----------------|
//! | [`metadata::MetadataStore`] | `metadata.db` (SQLite) | upsert files/chunks, delete by file, query by IDs, stats |
//! | [`vector::VectorStore`] | `vectors/vectors.db` | upsert vectors, delete by file, cosine top-k |
//! | [`graph::GraphStore`] | `graphdb/graph.db` | upsert nodes/edges, delete by file, bounded traversal |
//!
//! The sparse BM25 index is not a database — it is a serialised blob
//! rebuilt per batch — and lives in [`crate::sparse`].
//!
//! Chunk IDs are referentially identical across all stores: every chunk
//! referenced by a vector row, a sparse posting, or a graph node is present
//! in the metadata store. The indexer's write order maintains this; the
//! stores themselves only promise per-call atomicity (each multi-row write
//! runs in one transaction).

pub mod graph;
pub mod metadata;
pub mod vector;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::VaultError;

/// Open a SQLite pool in WAL mode, creating parent directories and the
/// database file as needed.
pub(crate) async fn connect(db_path: &Path) -> Result<SqlitePool, VaultError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::Storage(e.to_string()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| VaultError::Storage(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
