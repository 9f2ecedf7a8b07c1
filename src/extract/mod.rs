//! Entity and relation extraction.
//!
//! Two independently enabled layers consume a file's chunks and emit
//! `(entities, relations)`:
//!
//! - [`structural`] — always on; parses wikilinks, markdown links, inline
//!   tags, frontmatter, and the heading hierarchy.
//! - [`ner`] — optional; calls a zero-shot NER backend and emits `MENTIONS`
//!   and `CO_OCCURS` edges.
//!
//! [`acronyms`] is a third, index-time-only pass: it mines acronym
//! definitions from chunk text and persists them for query expansion.

pub mod acronyms;
pub mod ner;
pub mod structural;

use crate::chunker::ChunkedFile;
use crate::error::VaultError;
use crate::models::{ExtractionResult, FileInfo};

/// One extraction layer. Implementations must be pure over their inputs:
/// the indexer merges results from all enabled extractors before any store
/// is touched.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract entities and relations from one chunked file.
    fn extract(&self, file: &FileInfo, doc: &ChunkedFile) -> Result<ExtractionResult, VaultError>;
}
