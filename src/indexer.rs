//! Batch ingestion: files → chunks → embeddings → stores.
//!
//! # Write order
//!
//! Per file, writes land in an order that never leaves a dangling
//! cross-store reference:
//!
//! 0. If the file's checksum changed, delete its prior rows from each
//!    store in reverse order.
//! 1. File node and section nodes into the graph store.
//! 2. Chunks into the metadata store.
//! 3. Batched embeddings into the vector store.
//! 4. (Per batch, not per file) the sparse index is rebuilt from the full
//!    corpus — BM25 IDF needs a whole-corpus view — and serialised.
//! 5. Extracted entities, tags, and edges into the graph store.
//!
//! # Failure containment
//!
//! Each file moves through `DISCOVERED → CHUNKED → EMBEDDED → INDEXED`;
//! a failure at any step rolls that file back (its rows are removed from
//! every store, so a later run re-indexes it from scratch) and the batch
//! continues. Per-file failures are accumulated into the outcome summary.
//!
//! # Concurrency
//!
//! Reading, chunking, extraction, and embedding run on a bounded worker
//! pool (CPU count). Writes are serialised behind a single writer lock:
//! the embedded stores prefer one writer, and serialising makes the
//! rollback window trivial to reason about.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, Semaphore};

use crate::chunker::{chunk_file, ChunkedFile};
use crate::config::{Config, IndexManifest};
use crate::embedding::Embedder;
use crate::error::{IndexStep, VaultError};
use crate::extract::ner::{HttpNerBackend, NerExtractor};
use crate::extract::structural::StructuralExtractor;
use crate::extract::{acronyms, Extractor};
use crate::models::{
    normalize_entity_name, ExtractionResult, FileFailure, IndexOutcome, IndexStats,
};
use crate::reader::{discover_files, SourceFile};
use crate::store::graph::GraphStore;
use crate::store::metadata::MetadataStore;
use crate::store::vector::VectorStore;

pub struct Indexer {
    config: Config,
    metadata: Arc<MetadataStore>,
    vectors: Arc<VectorStore>,
    graph: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
}

/// Everything computed for one file before any store is touched.
struct PreparedFile {
    source: SourceFile,
    doc: ChunkedFile,
    extraction: ExtractionResult,
    vectors: Vec<(String, Vec<f32>)>,
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), VaultError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(VaultError::Cancelled),
        _ => Ok(()),
    }
}

impl Indexer {
    pub fn new(
        config: Config,
        metadata: Arc<MetadataStore>,
        vectors: Arc<VectorStore>,
        graph: Arc<GraphStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Indexer {
            config,
            metadata,
            vectors,
            graph,
            embedder,
        }
    }

    /// Index every Markdown file under `directory`.
    pub async fn run(
        &self,
        directory: &Path,
        deadline: Option<Instant>,
    ) -> Result<IndexOutcome, VaultError> {
        check_deadline(deadline)?;
        let discovery = discover_files(directory)?;
        let mut failures: Vec<FileFailure> = discovery
            .skipped
            .iter()
            .map(|e| FileFailure {
                path: match e {
                    VaultError::Read { path, .. } => path.clone(),
                    _ => Default::default(),
                },
                message: e.to_string(),
            })
            .collect();

        // Wikilink targets resolve against the titles of the whole batch.
        let mut titles: HashMap<String, String> = HashMap::new();
        for file in &discovery.files {
            let path = file.info.path.display().to_string();
            titles.insert(normalize_entity_name(&file.info.title), path.clone());
            if let Some(stem) = file.info.path.file_stem() {
                titles
                    .entry(normalize_entity_name(&stem.to_string_lossy()))
                    .or_insert(path);
            }
        }
        let extractors = Arc::new(self.build_extractors(titles)?);

        let workers = num_cpus::get().max(1);
        let cpu_pool = Arc::new(Semaphore::new(workers));
        // Store writes are serialised: one file commits at a time.
        let writer = Arc::new(Mutex::new(()));

        let results: Vec<Result<Vec<FileFailure>, VaultError>> =
            stream::iter(discovery.files.into_iter())
                .map(|source| {
                    let extractors = extractors.clone();
                    let cpu_pool = cpu_pool.clone();
                    let writer = writer.clone();
                    async move {
                        self.index_file(source, extractors, cpu_pool, writer, deadline)
                            .await
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        for result in results {
            match result {
                Ok(reports) => failures.extend(reports),
                // Fatal errors (Cancelled) abort the batch.
                Err(e) => return Err(e),
            }
        }

        check_deadline(deadline)?;
        self.finish_batch().await?;

        let stats = IndexStats {
            files: self.metadata.file_count().await?,
            chunks: self.metadata.chunk_count().await?,
            entities: self.graph.entity_count().await?,
            edges: self.graph.edge_count().await?,
            last_indexed: Some(Utc::now()),
        };
        self.metadata.save_stats(&stats).await?;
        IndexManifest::from_config(&self.config).save(&self.config.manifest_path())?;

        tracing::info!(
            files = stats.files,
            chunks = stats.chunks,
            entities = stats.entities,
            edges = stats.edges,
            failures = failures.len(),
            "indexing complete"
        );
        Ok(IndexOutcome { stats, failures })
    }

    fn build_extractors(
        &self,
        titles: HashMap<String, String>,
    ) -> Result<Vec<Box<dyn Extractor>>, VaultError> {
        let mut extractors: Vec<Box<dyn Extractor>> =
            vec![Box::new(StructuralExtractor::new(titles))];

        if self.config.extraction.depth == "ner" {
            let url = self.config.extraction.ner_url.clone().ok_or_else(|| {
                VaultError::Config("extraction.ner_url is required when depth = ner".into())
            })?;
            extractors.push(Box::new(NerExtractor::new(
                Box::new(HttpNerBackend::new(url)?),
                self.config.extraction.entity_types.clone(),
                self.config.extraction.score_floor,
            )));
        }
        Ok(extractors)
    }

    /// Index a single file. Locally recovered errors come back as report
    /// entries for the batch summary; `Err` is reserved for batch-fatal
    /// ones.
    async fn index_file(
        &self,
        source: SourceFile,
        extractors: Arc<Vec<Box<dyn Extractor>>>,
        cpu_pool: Arc<Semaphore>,
        writer: Arc<Mutex<()>>,
        deadline: Option<Instant>,
    ) -> Result<Vec<FileFailure>, VaultError> {
        check_deadline(deadline)?;
        let path = source.info.path.clone();

        // Unchanged files are left alone; their chunk IDs are already
        // byte-identical in every store.
        if self.metadata.file_checksum(&path).await? == Some(source.info.checksum.clone()) {
            tracing::debug!(path = %path.display(), "checksum unchanged, skipping");
            return Ok(Vec::new());
        }

        // CPU + model stage on the worker pool: chunk, extract, embed.
        let permit = cpu_pool
            .acquire()
            .await
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let prepared = {
            let config = self.config.clone();
            let embedder = self.embedder.clone();
            let extractors = extractors.clone();
            tokio::task::spawn_blocking(move || prepare_file(source, &config, embedder, &extractors))
                .await
                .map_err(|e| VaultError::Storage(e.to_string()))?
        };
        drop(permit);

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err((step, e)) => {
                tracing::warn!(path = %path.display(), step = %step, error = %e, "file failed, skipping");
                return Ok(vec![FileFailure {
                    path,
                    message: e.to_string(),
                }]);
            }
        };

        // Malformed frontmatter was recovered as opaque text; the file is
        // still indexed, but the parse error shows up in the summary.
        let mut reports: Vec<FileFailure> = Vec::new();
        if let Some(parse_error) = &prepared.doc.parse_error {
            tracing::warn!(path = %path.display(), error = %parse_error, "frontmatter treated as opaque text");
            reports.push(FileFailure {
                path: path.clone(),
                message: parse_error.to_string(),
            });
        }

        check_deadline(deadline)?;

        // Write stage, serialised across files.
        let _write_guard = writer.lock().await;
        match self.write_file(&prepared).await {
            Ok(()) => Ok(reports),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "store write failed, rolling back file");
                self.rollback_file(&path).await;
                reports.push(FileFailure {
                    path: path.clone(),
                    message: VaultError::IndexWrite {
                        path,
                        step: IndexStep::Indexed,
                        message: e.to_string(),
                    }
                    .to_string(),
                });
                Ok(reports)
            }
        }
    }

    /// Commit one prepared file to the stores in reference-safe order.
    async fn write_file(&self, prepared: &PreparedFile) -> Result<(), VaultError> {
        let info = &prepared.source.info;
        let path = &info.path;

        // (0) Drop prior rows, reverse of the write order below.
        self.graph.delete_by_file(path).await?;
        self.vectors.delete_file(path).await?;

        // (1) Graph: the file node and its section tree.
        self.graph.upsert_file_node(info).await?;
        for chunk in &prepared.doc.chunks {
            self.graph
                .upsert_section_node(&chunk.id, chunk.heading(), chunk.level, path)
                .await?;
        }
        for title in &prepared.extraction.synthetic_files {
            self.graph.upsert_synthetic_file_node(title).await?;
        }

        // (2) Metadata: file row and chunks.
        self.metadata.upsert_file(info).await?;
        self.metadata.replace_chunks(path, &prepared.doc.chunks).await?;

        // (3) Vectors.
        self.vectors.replace_for_file(path, &prepared.vectors).await?;

        // (5) Graph: entities, tags, edges. (Step 4, the sparse index, is
        // rebuilt once per batch in finish_batch.) Edge weights combine the
        // configured per-type constant with the extractor's own weight
        // (mention frequency for MENTIONS, 1.0 elsewhere).
        for entity in &prepared.extraction.entities {
            self.graph.upsert_entity_node(entity).await?;
        }
        for tag in &prepared.extraction.tags {
            self.graph.upsert_tag_node(tag).await?;
        }
        let weights = &self.config.retrieval.edge_weights;
        let relations: Vec<crate::models::Relation> = prepared
            .extraction
            .relations
            .iter()
            .map(|r| {
                let type_weight = weights.get(r.kind.as_str()).copied().unwrap_or(1.0);
                crate::models::Relation {
                    source_id: r.source_id.clone(),
                    target_id: r.target_id.clone(),
                    kind: r.kind,
                    weight: type_weight * r.weight,
                }
            })
            .collect();
        self.graph.upsert_edges(&relations, path).await?;

        Ok(())
    }

    /// Remove every trace of a file after a failed write, so the next run
    /// re-indexes it from scratch and no store holds a dangling reference.
    async fn rollback_file(&self, path: &Path) {
        if let Err(e) = self.graph.delete_by_file(path).await {
            tracing::error!(path = %path.display(), error = %e, "rollback: graph delete failed");
        }
        if let Err(e) = self.vectors.delete_file(path).await {
            tracing::error!(path = %path.display(), error = %e, "rollback: vector delete failed");
        }
        if let Err(e) = self.metadata.delete_file(path).await {
            tracing::error!(path = %path.display(), error = %e, "rollback: metadata delete failed");
        }
    }

    /// Batch epilogue: rebuild the sparse index and the acronym dictionary
    /// from the full corpus view.
    async fn finish_batch(&self) -> Result<(), VaultError> {
        let chunks = self.metadata.all_chunks().await?;

        let id_texts: Vec<(String, String)> = chunks
            .iter()
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();
        let bm25_path = self.config.bm25_path();
        let acronym_path = self.config.acronyms_path();

        tokio::task::spawn_blocking(move || -> Result<(), VaultError> {
            let index = crate::sparse::SparseIndex::build(
                &id_texts,
                crate::sparse::DEFAULT_K1,
                crate::sparse::DEFAULT_B,
            );
            index.save(&bm25_path)
        })
        .await
        .map_err(|e| VaultError::Storage(e.to_string()))??;

        let dict = acronyms::harvest(&chunks);
        acronyms::save(&dict, &acronym_path)?;
        Ok(())
    }
}

/// CPU-stage work for one file: chunk, extract, embed. Returns the failed
/// step alongside the error so failures report where the file stopped.
fn prepare_file(
    source: SourceFile,
    config: &Config,
    embedder: Arc<dyn Embedder>,
    extractors: &[Box<dyn Extractor>],
) -> Result<PreparedFile, (IndexStep, VaultError)> {
    let doc = chunk_file(
        &source.info.path,
        &source.content,
        config.chunking.max_tokens,
        config.chunking.overlap_tokens,
    );

    let mut extraction = ExtractionResult::default();
    for extractor in extractors {
        let result = extractor
            .extract(&source.info, &doc)
            .map_err(|e| (IndexStep::Chunked, e))?;
        extraction.merge(result);
    }

    let texts: Vec<String> = doc.chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder
        .embed_batch(&texts)
        .map_err(|e| (IndexStep::Embedded, e))?;
    if embeddings.len() != doc.chunks.len() {
        return Err((
            IndexStep::Embedded,
            VaultError::Model(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                doc.chunks.len()
            )),
        ));
    }

    let vectors = doc
        .chunks
        .iter()
        .map(|c| c.id.clone())
        .zip(embeddings)
        .collect();

    Ok(PreparedFile {
        source,
        doc,
        extraction,
        vectors,
    })
}
