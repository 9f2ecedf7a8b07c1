//! Zero-shot named-entity extraction.
//!
//! The NER model itself is an external collaborator: the backend contract
//! is `(chunk_text, type_list) → [(surface, type, start, end, score)]`.
//! The default backend posts to a local HTTP endpoint (a GLiNER-style
//! server) with the retry/backoff discipline used elsewhere for model
//! services; tests substitute a deterministic stub.
//!
//! For every chunk the extractor emits:
//! - `MENTIONS` edges from the chunk's section to each distinct entity,
//!   weighted by the surface-form frequency within the chunk;
//! - `CO_OCCURS` edges between every pair of distinct entities found in the
//!   same chunk (weight 1.0).

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::chunker::ChunkedFile;
use crate::error::VaultError;
use crate::extract::Extractor;
use crate::models::{EdgeKind, Entity, EntityKind, ExtractionResult, FileInfo, Relation};

/// One model prediction: a surface form with its label, character span, and
/// confidence.
#[derive(Debug, Clone, Deserialize)]
pub struct NerSpan {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Contract every NER backend must satisfy.
pub trait NerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Predict entities of the given types in `text`.
    fn predict(&self, text: &str, types: &[String]) -> Result<Vec<NerSpan>, VaultError>;
}

/// HTTP backend for a local zero-shot NER server.
///
/// Expects `POST {url}` with `{"text": ..., "labels": [...]}` and a JSON
/// array of spans in response. Retries transient failures (429/5xx/network)
/// with exponential backoff; other client errors fail immediately.
///
/// The blocking client is created on first use — predictions run on the
/// indexer's worker pool, never on the async runtime.
pub struct HttpNerBackend {
    client: std::sync::OnceLock<reqwest::blocking::Client>,
    url: String,
    max_retries: u32,
}

impl HttpNerBackend {
    pub fn new(url: String) -> Result<Self, VaultError> {
        Ok(HttpNerBackend {
            client: std::sync::OnceLock::new(),
            url,
            max_retries: 3,
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, VaultError> {
        if self.client.get().is_none() {
            let built = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| VaultError::Model(e.to_string()))?;
            let _ = self.client.set(built);
        }
        self.client
            .get()
            .ok_or_else(|| VaultError::Model("NER client initialisation raced".into()))
    }
}

impl NerBackend for HttpNerBackend {
    fn name(&self) -> &str {
        &self.url
    }

    fn predict(&self, text: &str, types: &[String]) -> Result<Vec<NerSpan>, VaultError> {
        let client = self.client()?;
        let body = serde_json::json!({ "text": text, "labels": types });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1 << (attempt - 1).min(5)));
            }

            match client.post(&self.url).json(&body).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Vec<NerSpan>>()
                            .map_err(|e| VaultError::Model(format!("bad NER response: {}", e)));
                    }
                    let text = response.text().unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(VaultError::Model(format!(
                            "NER backend error {}: {}",
                            status, text
                        )));
                        continue;
                    }
                    return Err(VaultError::Model(format!(
                        "NER backend error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(VaultError::Model(format!(
                        "NER backend unreachable at {}: {}",
                        self.url, e
                    )));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| VaultError::Model("NER prediction failed after retries".into())))
    }
}

/// NER extraction layer over a pluggable backend.
pub struct NerExtractor {
    backend: Box<dyn NerBackend>,
    entity_types: Vec<String>,
    score_floor: f32,
}

impl NerExtractor {
    pub fn new(backend: Box<dyn NerBackend>, entity_types: Vec<String>, score_floor: f32) -> Self {
        NerExtractor {
            backend,
            entity_types,
            score_floor,
        }
    }
}

impl Extractor for NerExtractor {
    fn name(&self) -> &'static str {
        "ner"
    }

    fn extract(&self, _file: &FileInfo, doc: &ChunkedFile) -> Result<ExtractionResult, VaultError> {
        let mut out = ExtractionResult::default();
        // Entities are global: the same normalised (name, kind) pair shares
        // an ID across chunks, so dedupe here by ID.
        let mut seen: HashMap<String, Entity> = HashMap::new();

        for chunk in &doc.chunks {
            let spans = self.backend.predict(&chunk.text, &self.entity_types)?;

            let mut frequency: HashMap<String, u32> = HashMap::new();
            let mut chunk_entities: Vec<String> = Vec::new();

            for span in spans {
                if span.score < self.score_floor || span.text.trim().is_empty() {
                    continue;
                }
                let entity = Entity::new(span.text.trim(), EntityKind::from_label(&span.label));
                *frequency.entry(entity.id.clone()).or_default() += 1;
                if !chunk_entities.contains(&entity.id) {
                    chunk_entities.push(entity.id.clone());
                }
                seen.entry(entity.id.clone()).or_insert(entity);
            }

            for (i, a) in chunk_entities.iter().enumerate() {
                for b in &chunk_entities[i + 1..] {
                    out.relations
                        .push(Relation::new(a, b, EdgeKind::CoOccurs).with_weight(1.0));
                }
            }

            for id in &chunk_entities {
                let freq = frequency.get(id).copied().unwrap_or(1);
                out.relations.push(
                    Relation::new(&chunk.id, id, EdgeKind::Mentions).with_weight(freq as f32),
                );
            }
        }

        out.entities = seen.into_values().collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    /// Deterministic backend: tags every capitalised token as a concept
    /// with a fixed score.
    struct StubBackend {
        score: f32,
    }

    impl NerBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn predict(&self, text: &str, _types: &[String]) -> Result<Vec<NerSpan>, VaultError> {
            let mut spans = Vec::new();
            let mut offset = 0;
            for word in text.split_whitespace() {
                let start = text[offset..].find(word).map(|i| i + offset).unwrap_or(0);
                offset = start + word.len();
                let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
                if clean.chars().next().map_or(false, |c| c.is_uppercase()) && clean.len() > 2 {
                    spans.push(NerSpan {
                        text: clean.to_string(),
                        label: "concept".to_string(),
                        start,
                        end: start + clean.len(),
                        score: self.score,
                    });
                }
            }
            Ok(spans)
        }
    }

    fn run(content: &str, score: f32, floor: f32) -> ExtractionResult {
        let path = Path::new("/vault/people.md");
        let doc = chunk_file(path, content, 512, 50);
        let file = FileInfo {
            path: PathBuf::from(path),
            title: "people".to_string(),
            checksum: "0".repeat(32),
            size_bytes: 0,
            mtime: Utc::now(),
        };
        NerExtractor::new(
            Box::new(StubBackend { score }),
            vec!["concept".to_string()],
            floor,
        )
        .extract(&file, &doc)
        .unwrap()
    }

    #[test]
    fn test_mentions_and_cooccurs() {
        let result = run("alice met Bob and Carol at the lab.\n", 0.9, 0.5);
        let names: Vec<_> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(result.entities.len(), 2);
        assert!(names.contains(&"Bob") && names.contains(&"Carol"));

        let mentions: Vec<_> = result
            .relations
            .iter()
            .filter(|r| r.kind == EdgeKind::Mentions)
            .collect();
        assert_eq!(mentions.len(), 2);

        let cooccurs: Vec<_> = result
            .relations
            .iter()
            .filter(|r| r.kind == EdgeKind::CoOccurs)
            .collect();
        assert_eq!(cooccurs.len(), 1);
    }

    #[test]
    fn test_score_floor_discards() {
        let result = run("Bob met Carol.\n", 0.3, 0.5);
        assert!(result.entities.is_empty());
        assert!(result.relations.is_empty());
    }

    #[test]
    fn test_mention_weight_counts_frequency() {
        let result = run("Bob asked. Bob answered. Bob left.\n", 0.9, 0.5);
        let mention = result
            .relations
            .iter()
            .find(|r| r.kind == EdgeKind::Mentions)
            .expect("mention edge");
        assert_eq!(mention.weight, 3.0);
    }

    #[test]
    fn test_entity_ids_global_across_chunks() {
        let result = run("# A\nBob wrote this.\n# B\nBob wrote that too.\n", 0.9, 0.5);
        // One global entity, mentioned from two chunks.
        assert_eq!(result.entities.len(), 1);
        let mentions = result
            .relations
            .iter()
            .filter(|r| r.kind == EdgeKind::Mentions)
            .count();
        assert_eq!(mentions, 2);
    }
}
