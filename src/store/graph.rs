//! Property-graph store: node and edge tables keyed by stable IDs.
//!
//! The graph is genuinely cyclic (entities ↔ sections ↔ entities), so it is
//! represented as flat node/edge tables rather than in-memory references;
//! navigation always goes through IDs.
//!
//! Node labels: `File`, `Section`, `Entity`, `Tag`. Section nodes are keyed
//! by chunk ID so graph traversal lands directly on retrievable units.
//! Every node and edge written while indexing a file carries that file's
//! path, which is what makes cascade deletion possible when the file
//! changes or disappears. Entity and Tag nodes are global (no owning file)
//! and are never orphan-collected on the indexing hot path.
//!
//! The store is single-writer, single-reader: an advisory lock file in the
//! graph directory keeps a second process out.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::{Row, SqlitePool};

use crate::error::VaultError;
use crate::models::{EdgeKind, Entity, FileInfo, Relation, Tag};

/// Advisory lock: a sentinel file created with `create_new`, removed when
/// the store handle drops. A second open fails instead of corrupting the
/// embedded database.
struct GraphLock {
    path: PathBuf,
}

impl GraphLock {
    fn acquire(dir: &Path) -> Result<Self, VaultError> {
        std::fs::create_dir_all(dir).map_err(|e| VaultError::Storage(e.to_string()))?;
        let path = dir.join(".lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(GraphLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(VaultError::Storage(format!(
                    "graph store is locked by another process; remove {} if stale",
                    path.display()
                )))
            }
            Err(e) => Err(VaultError::Storage(e.to_string())),
        }
    }
}

impl Drop for GraphLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct GraphStore {
    pool: SqlitePool,
    _lock: GraphLock,
}

impl GraphStore {
    /// Open (and migrate) the graph database under `dir`, taking the
    /// advisory lock.
    pub async fn open(dir: &Path) -> Result<Self, VaultError> {
        let lock = GraphLock::acquire(dir)?;
        let pool = super::connect(&dir.join("graph.db")).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT '',
                file_path TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edges (
                src TEXT NOT NULL,
                dst TEXT NOT NULL,
                kind TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                file_path TEXT,
                PRIMARY KEY (src, dst, kind)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_file_path ON nodes(file_path)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_file_path ON edges(file_path)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src)")
            .execute(&pool)
            .await?;

        Ok(GraphStore { pool, _lock: lock })
    }

    // -- node upserts -------------------------------------------------------

    pub async fn upsert_file_node(&self, info: &FileInfo) -> Result<(), VaultError> {
        self.upsert_node(
            &info.path.display().to_string(),
            "File",
            &info.title,
            "",
            Some(&info.path.display().to_string()),
        )
        .await
    }

    /// A File node for a wikilink target that resolved to no real file.
    pub async fn upsert_synthetic_file_node(&self, title: &str) -> Result<(), VaultError> {
        let id = crate::models::normalize_entity_name(title);
        self.upsert_node(&id, "File", title, "", None).await
    }

    pub async fn upsert_section_node(
        &self,
        chunk_id: &str,
        heading: &str,
        level: u8,
        file_path: &Path,
    ) -> Result<(), VaultError> {
        self.upsert_node(
            chunk_id,
            "Section",
            heading,
            &level.to_string(),
            Some(&file_path.display().to_string()),
        )
        .await
    }

    pub async fn upsert_entity_node(&self, entity: &Entity) -> Result<(), VaultError> {
        self.upsert_node(&entity.id, "Entity", &entity.name, entity.kind.as_str(), None)
            .await
    }

    pub async fn upsert_tag_node(&self, tag: &Tag) -> Result<(), VaultError> {
        self.upsert_node(&tag.id, "Tag", &tag.raw, "", None).await
    }

    async fn upsert_node(
        &self,
        id: &str,
        label: &str,
        name: &str,
        kind: &str,
        file_path: Option<&str>,
    ) -> Result<(), VaultError> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, label, name, kind, file_path)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                name = excluded.name,
                kind = excluded.kind,
                file_path = COALESCE(excluded.file_path, nodes.file_path)
            "#,
        )
        .bind(id)
        .bind(label)
        .bind(name)
        .bind(kind)
        .bind(file_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- edges --------------------------------------------------------------

    /// Upsert edges, recording `provenance` as the owning file for cascade
    /// deletion.
    pub async fn upsert_edges(
        &self,
        relations: &[Relation],
        provenance: &Path,
    ) -> Result<(), VaultError> {
        let mut tx = self.pool.begin().await?;
        let file_path = provenance.display().to_string();
        for relation in relations {
            sqlx::query(
                r#"
                INSERT INTO edges (src, dst, kind, weight, file_path)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(src, dst, kind) DO UPDATE SET
                    weight = excluded.weight,
                    file_path = excluded.file_path
                "#,
            )
            .bind(&relation.source_id)
            .bind(&relation.target_id)
            .bind(relation.kind.as_str())
            .bind(relation.weight as f64)
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove all nodes and edges owned by `path`. Entity and Tag nodes are
    /// global and survive; the edges that referenced them from this file do
    /// not.
    pub async fn delete_by_file(&self, path: &Path) -> Result<(), VaultError> {
        let mut tx = self.pool.begin().await?;
        let file_path = path.display().to_string();
        sqlx::query("DELETE FROM edges WHERE file_path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE file_path = ?")
            .bind(&file_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -- traversal ----------------------------------------------------------

    /// Breadth-first expansion from `seeds` over `kinds`, at most
    /// `max_hops` hops, scoring every reached node with
    /// `Σ edge_weight / hop²` across paths. Only Section nodes (retrievable
    /// chunks) are returned; a seed only scores when some other seed
    /// reaches it. Edges are traversed in both directions.
    pub async fn traverse(
        &self,
        seeds: &[String],
        max_hops: u8,
        kinds: &[EdgeKind],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VaultError> {
        if seeds.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let kind_set: HashSet<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let rows = sqlx::query("SELECT src, dst, kind, weight FROM edges")
            .fetch_all(&self.pool)
            .await?;

        let mut adjacency: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        for row in &rows {
            let kind: String = row.get("kind");
            if !kind_set.contains(kind.as_str()) {
                continue;
            }
            let src: String = row.get("src");
            let dst: String = row.get("dst");
            let weight: f64 = row.get("weight");
            adjacency
                .entry(src.clone())
                .or_default()
                .push((dst.clone(), weight));
            adjacency.entry(dst).or_default().push((src, weight));
        }

        let sections: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT id FROM nodes WHERE label = 'Section'")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let mut scores: HashMap<String, f64> = HashMap::new();

        for seed in seeds {
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(seed.clone());
            let mut frontier: Vec<String> = vec![seed.clone()];

            for hop in 1..=max_hops as u32 {
                let divisor = (hop * hop) as f64;
                let mut next: Vec<String> = Vec::new();
                for node in &frontier {
                    let Some(neighbors) = adjacency.get(node) else {
                        continue;
                    };
                    for (neighbor, weight) in neighbors {
                        if neighbor == seed {
                            continue;
                        }
                        *scores.entry(neighbor.clone()).or_default() += weight / divisor;
                        if visited.insert(neighbor.clone()) {
                            next.push(neighbor.clone());
                        }
                    }
                }
                frontier = next;
            }
        }

        let mut results: Vec<(String, f32)> = scores
            .into_iter()
            .filter(|(id, _)| sections.contains(id))
            .map(|(id, score)| (id, score as f32))
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(limit);
        Ok(results)
    }

    // -- counts & housekeeping ----------------------------------------------

    pub async fn entity_count(&self) -> Result<u64, VaultError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE label IN ('Entity', 'Tag')")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    pub async fn edge_count(&self) -> Result<u64, VaultError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn delete_all(&self) -> Result<(), VaultError> {
        sqlx::query("DELETE FROM edges").execute(&self.pool).await?;
        sqlx::query("DELETE FROM nodes").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn store() -> (TempDir, GraphStore) {
        let tmp = TempDir::new().unwrap();
        let store = GraphStore::open(&tmp.path().join("graphdb")).await.unwrap();
        (tmp, store)
    }

    fn file_info(path: &str) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            title: "Title".to_string(),
            checksum: "0".repeat(32),
            size_bytes: 0,
            mtime: Utc::now(),
        }
    }

    async fn section(store: &GraphStore, id: &str, file: &str) {
        store
            .upsert_section_node(id, id, 1, Path::new(file))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_excludes_second_opener() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("graphdb");
        let first = GraphStore::open(&dir).await.unwrap();
        assert!(GraphStore::open(&dir).await.is_err());
        drop(first);
        assert!(GraphStore::open(&dir).await.is_ok());
    }

    #[tokio::test]
    async fn test_traverse_scores_by_hop_distance() {
        let (_tmp, store) = store().await;
        for id in ["seed", "one", "two"] {
            section(&store, id, "/vault/a.md").await;
        }
        let relations = vec![
            Relation::new("seed", "one", EdgeKind::LinksTo).with_weight(1.0),
            Relation::new("one", "two", EdgeKind::LinksTo).with_weight(1.0),
        ];
        store
            .upsert_edges(&relations, Path::new("/vault/a.md"))
            .await
            .unwrap();

        let hits = store
            .traverse(
                &["seed".to_string()],
                2,
                &[EdgeKind::LinksTo],
                10,
            )
            .await
            .unwrap();

        // hop 1 scores w/1, hop 2 scores w/4; the seed itself is excluded.
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "one");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, "two");
        assert!((hits[1].1 - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_traverse_only_returns_sections() {
        let (_tmp, store) = store().await;
        section(&store, "seed", "/vault/a.md").await;
        section(&store, "other", "/vault/b.md").await;
        let entity = Entity::new("Alice", crate::models::EntityKind::Person);
        store.upsert_entity_node(&entity).await.unwrap();

        let relations = vec![
            Relation::new("seed", &entity.id, EdgeKind::Mentions).with_weight(0.8),
            Relation::new("other", &entity.id, EdgeKind::Mentions).with_weight(0.8),
        ];
        store
            .upsert_edges(&relations, Path::new("/vault/a.md"))
            .await
            .unwrap();

        let hits = store
            .traverse(
                &["seed".to_string()],
                2,
                &[EdgeKind::Mentions],
                10,
            )
            .await
            .unwrap();

        // Reaches `other` through the shared entity; the entity node itself
        // is not a retrievable result.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "other");
    }

    #[tokio::test]
    async fn test_no_seeds_returns_empty() {
        let (_tmp, store) = store().await;
        let hits = store.traverse(&[], 2, &[EdgeKind::LinksTo], 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_file_keeps_global_nodes() {
        let (_tmp, store) = store().await;
        store.upsert_file_node(&file_info("/vault/a.md")).await.unwrap();
        section(&store, "s0", "/vault/a.md").await;
        let entity = Entity::new("Alice", crate::models::EntityKind::Person);
        store.upsert_entity_node(&entity).await.unwrap();
        store
            .upsert_edges(
                &[Relation::new("s0", &entity.id, EdgeKind::Mentions)],
                Path::new("/vault/a.md"),
            )
            .await
            .unwrap();

        store.delete_by_file(Path::new("/vault/a.md")).await.unwrap();
        assert_eq!(store.edge_count().await.unwrap(), 0);
        // The global entity survives; the file's nodes are gone.
        assert_eq!(store.entity_count().await.unwrap(), 1);
    }
}
