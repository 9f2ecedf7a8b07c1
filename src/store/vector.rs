//! Vector store: embedding BLOBs keyed by chunk ID.
//!
//! Vectors are stored as little-endian `f32` bytes in
//! `vectors/vectors.db`. Search is an exact cosine scan — a personal vault
//! is a few thousand chunks, where a scan beats the constant factors of an
//! approximate index and stays byte-deterministic.

use std::path::Path;

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::VaultError;

pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    /// Open (and migrate) the vector database under `dir`.
    pub async fn open(dir: &Path) -> Result<Self, VaultError> {
        let pool = super::connect(&dir.join("vectors.db")).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_vectors (
                chunk_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_file_path ON chunk_vectors(file_path)",
        )
        .execute(&pool)
        .await?;
        Ok(VectorStore { pool })
    }

    /// Replace all vectors for a file in one transaction.
    pub async fn replace_for_file(
        &self,
        path: &Path,
        entries: &[(String, Vec<f32>)],
    ) -> Result<(), VaultError> {
        let mut tx = self.pool.begin().await?;
        let file_path = path.display().to_string();

        sqlx::query("DELETE FROM chunk_vectors WHERE file_path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;

        for (chunk_id, vector) in entries {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, file_path, embedding) VALUES (?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(&file_path)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_file(&self, path: &Path) -> Result<(), VaultError> {
        sqlx::query("DELETE FROM chunk_vectors WHERE file_path = ?")
            .bind(path.display().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Nearest neighbours of `query` by cosine similarity, best first.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VaultError> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(String, f32)> = rows
            .iter()
            .map(|row| {
                let chunk_id: String = row.get("chunk_id");
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query, &blob_to_vec(&blob));
                (chunk_id, similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    pub async fn count(&self) -> Result<u64, VaultError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn delete_all(&self) -> Result<(), VaultError> {
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
