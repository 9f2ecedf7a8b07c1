//! SQLite-backed metadata store: files, chunks, and index statistics.
//!
//! Heading paths are serialised as JSON arrays. All multi-row writes run in
//! a single transaction so a failed file never leaves partial chunk rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::VaultError;
use crate::models::{Chunk, FileInfo, IndexStats};

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (and migrate) the metadata database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, VaultError> {
        let pool = super::connect(db_path).await?;
        let store = MetadataStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                checksum TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                heading_path TEXT NOT NULL DEFAULT '[]',
                level INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL,
                start_byte INTEGER NOT NULL DEFAULT 0,
                end_byte INTEGER NOT NULL DEFAULT 0,
                tokens INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_path, ordinal)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                files INTEGER NOT NULL DEFAULT 0,
                chunks INTEGER NOT NULL DEFAULT 0,
                entities INTEGER NOT NULL DEFAULT 0,
                edges INTEGER NOT NULL DEFAULT 0,
                last_indexed TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // -- files --------------------------------------------------------------

    pub async fn upsert_file(&self, info: &FileInfo) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            INSERT INTO files (path, title, checksum, size, mtime, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                checksum = excluded.checksum,
                size = excluded.size,
                mtime = excluded.mtime,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(info.path.display().to_string())
        .bind(&info.title)
        .bind(&info.checksum)
        .bind(info.size_bytes as i64)
        .bind(info.mtime.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored checksum for a file, if it has been indexed before.
    pub async fn file_checksum(&self, path: &Path) -> Result<Option<String>, VaultError> {
        let checksum: Option<String> =
            sqlx::query_scalar("SELECT checksum FROM files WHERE path = ?")
                .bind(path.display().to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(checksum)
    }

    /// Lowercased title and file-stem → path map for wikilink resolution.
    pub async fn title_map(&self) -> Result<HashMap<String, String>, VaultError> {
        let rows = sqlx::query("SELECT path, title FROM files")
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::new();
        for row in rows {
            let path: String = row.get("path");
            let title: String = row.get("title");
            map.insert(crate::models::normalize_entity_name(&title), path.clone());
            if let Some(stem) = Path::new(&path).file_stem() {
                map.entry(crate::models::normalize_entity_name(&stem.to_string_lossy()))
                    .or_insert(path);
            }
        }
        Ok(map)
    }

    // -- chunks -------------------------------------------------------------

    /// Replace all chunks for a file in one transaction.
    pub async fn replace_chunks(&self, path: &Path, chunks: &[Chunk]) -> Result<(), VaultError> {
        let mut tx = self.pool.begin().await?;
        let file_path = path.display().to_string();

        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let heading_path = serde_json::to_string(&chunk.heading_path)
                .map_err(|e| VaultError::Storage(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_path, ordinal, heading_path, level, text, start_byte, end_byte, tokens)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&file_path)
            .bind(chunk.ordinal)
            .bind(heading_path)
            .bind(chunk.level as i64)
            .bind(&chunk.text)
            .bind(chunk.start_byte as i64)
            .bind(chunk.end_byte as i64)
            .bind(chunk.tokens as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a file and all of its chunks.
    pub async fn delete_file(&self, path: &Path) -> Result<(), VaultError> {
        let mut tx = self.pool.begin().await?;
        let file_path = path.display().to_string();
        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, VaultError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, file_path, ordinal, heading_path, level, text, start_byte, end_byte, tokens \
             FROM chunks WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chunk).collect()
    }

    pub async fn all_chunks(&self) -> Result<Vec<Chunk>, VaultError> {
        let rows = sqlx::query(
            "SELECT id, file_path, ordinal, heading_path, level, text, start_byte, end_byte, tokens \
             FROM chunks ORDER BY file_path, ordinal",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    /// Distinct heading paths across the corpus, for query expansion.
    pub async fn heading_paths(&self) -> Result<Vec<Vec<String>>, VaultError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT heading_path FROM chunks WHERE heading_path != '[]'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    pub async fn chunk_count(&self) -> Result<u64, VaultError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn file_count(&self) -> Result<u64, VaultError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    // -- stats --------------------------------------------------------------

    pub async fn save_stats(&self, stats: &IndexStats) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            INSERT INTO stats (id, files, chunks, entities, edges, last_indexed)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                files = excluded.files,
                chunks = excluded.chunks,
                entities = excluded.entities,
                edges = excluded.edges,
                last_indexed = excluded.last_indexed
            "#,
        )
        .bind(stats.files as i64)
        .bind(stats.chunks as i64)
        .bind(stats.entities as i64)
        .bind(stats.edges as i64)
        .bind(stats.last_indexed.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<Option<IndexStats>, VaultError> {
        let row = sqlx::query(
            "SELECT files, chunks, entities, edges, last_indexed FROM stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let last_indexed: Option<String> = row.get("last_indexed");
        Ok(Some(IndexStats {
            files: row.get::<i64, _>("files") as u64,
            chunks: row.get::<i64, _>("chunks") as u64,
            entities: row.get::<i64, _>("entities") as u64,
            edges: row.get::<i64, _>("edges") as u64,
            last_indexed: last_indexed
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        }))
    }

    // -- housekeeping -------------------------------------------------------

    pub async fn delete_all(&self) -> Result<(), VaultError> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        sqlx::query("DELETE FROM files").execute(&self.pool).await?;
        sqlx::query("DELETE FROM stats").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, VaultError> {
    let heading_path: String = row.get("heading_path");
    Ok(Chunk {
        id: row.get("id"),
        file_path: PathBuf::from(row.get::<String, _>("file_path")),
        ordinal: row.get("ordinal"),
        heading_path: serde_json::from_str(&heading_path)
            .map_err(|e| VaultError::Storage(format!("corrupt heading_path: {}", e)))?,
        level: row.get::<i64, _>("level") as u8,
        text: row.get("text"),
        start_byte: row.get::<i64, _>("start_byte") as usize,
        end_byte: row.get::<i64, _>("end_byte") as usize,
        tokens: row.get::<i64, _>("tokens") as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use tempfile::TempDir;

    async fn store() -> (TempDir, MetadataStore) {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::open(&tmp.path().join("metadata.db"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn sample_file(path: &str, checksum: &str) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            title: "Sample".to_string(),
            checksum: checksum.to_string(),
            size_bytes: 10,
            mtime: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_checksum_lookup() {
        let (_tmp, store) = store().await;
        let info = sample_file("/vault/a.md", "abc");
        store.upsert_file(&info).await.unwrap();
        assert_eq!(
            store.file_checksum(Path::new("/vault/a.md")).await.unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(
            store.file_checksum(Path::new("/vault/b.md")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_replace_chunks_is_idempotent() {
        let (_tmp, store) = store().await;
        let path = Path::new("/vault/a.md");
        let doc = chunk_file(path, "# A\none\n# B\ntwo\n", 512, 50);

        store.replace_chunks(path, &doc.chunks).await.unwrap();
        store.replace_chunks(path, &doc.chunks).await.unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), 2);

        let ids: Vec<String> = doc.chunks.iter().map(|c| c.id.clone()).collect();
        let fetched = store.get_chunks(&ids).await.unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_file_cascades_to_chunks() {
        let (_tmp, store) = store().await;
        let path = Path::new("/vault/a.md");
        store.upsert_file(&sample_file("/vault/a.md", "x")).await.unwrap();
        let doc = chunk_file(path, "# A\ncontent\n", 512, 50);
        store.replace_chunks(path, &doc.chunks).await.unwrap();

        store.delete_file(path).await.unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        assert_eq!(store.file_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_roundtrip() {
        let (_tmp, store) = store().await;
        assert!(store.get_stats().await.unwrap().is_none());

        let stats = IndexStats {
            files: 3,
            chunks: 12,
            entities: 5,
            edges: 9,
            last_indexed: Some(Utc::now()),
        };
        store.save_stats(&stats).await.unwrap();
        let loaded = store.get_stats().await.unwrap().unwrap();
        assert_eq!(loaded.files, 3);
        assert_eq!(loaded.chunks, 12);
        assert!(loaded.last_indexed.is_some());
    }

    #[tokio::test]
    async fn test_heading_paths_distinct() {
        let (_tmp, store) = store().await;
        let path = Path::new("/vault/a.md");
        let doc = chunk_file(path, "# Deploy\n## Steps\ngo\n", 512, 50);
        store.replace_chunks(path, &doc.chunks).await.unwrap();

        let headings = store.heading_paths().await.unwrap();
        assert!(headings.contains(&vec!["Deploy".to_string(), "Steps".to_string()]));
    }
}
