//! Structural extraction from Markdown syntax.
//!
//! Recognised patterns:
//! - `[[wikilinks]]` (and the alias form `[[target|label]]`) — `LINKS_TO`
//!   edges from the chunk to the target. Targets resolve against file
//!   titles, case-insensitive, landing on the target file's first section;
//!   unresolved targets become pending edges to a synthetic File node by
//!   title.
//! - Markdown links to `.md` files — `LINKS_TO`, anchors stripped.
//! - Inline `#tags` (heading lines excluded) — `HAS_TAG`.
//! - YAML frontmatter key/value pairs — `HAS_FRONTMATTER` from the file;
//!   the `tags` key feeds `HAS_TAG` instead.
//! - Heading hierarchy — `PARENT_OF` between a chunk and the chunk whose
//!   heading path is its immediate prefix, plus `HAS_SECTION` from the file
//!   to every chunk.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::chunker::ChunkedFile;
use crate::error::VaultError;
use crate::extract::Extractor;
use crate::models::{
    normalize_entity_name, EdgeKind, Entity, EntityKind, ExtractionResult, FileInfo, Relation, Tag,
};

fn wikilink_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").expect("static regex"))
}

fn inline_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|\s)#([A-Za-z_][\w/-]*)").expect("static regex"))
}

fn md_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]+\.md)(?:#[^)]*)?\)").expect("static regex"))
}

/// Structural extractor. Holds the corpus title → path map built from the
/// current discovery pass so wikilinks can resolve to real files.
pub struct StructuralExtractor {
    /// Lowercased file title (and file stem) → file path string.
    titles: HashMap<String, String>,
}

impl StructuralExtractor {
    pub fn new(titles: HashMap<String, String>) -> Self {
        StructuralExtractor { titles }
    }

    /// Resolve a link target against known file titles (case-insensitive).
    /// A resolved link points at the target file's first section — chunk
    /// IDs are deterministic, so the ID is computable without reading the
    /// target — which keeps `LINKS_TO` edges traversable end to end.
    fn resolve(&self, target: &str) -> Option<String> {
        let key = normalize_entity_name(target);
        self.titles
            .get(&key)
            .map(|path| crate::models::chunk_id(std::path::Path::new(path), 0))
    }
}

impl Extractor for StructuralExtractor {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn extract(&self, file: &FileInfo, doc: &ChunkedFile) -> Result<ExtractionResult, VaultError> {
        let mut out = ExtractionResult::default();
        let file_id = file.path.display().to_string();

        // heading path → chunk id, for PARENT_OF resolution. The first chunk
        // of a section represents it in the graph.
        let mut hierarchy: HashMap<Vec<String>, String> = HashMap::new();
        for chunk in &doc.chunks {
            hierarchy
                .entry(chunk.heading_path.clone())
                .or_insert_with(|| chunk.id.clone());
        }

        for chunk in &doc.chunks {
            // File owns every chunk.
            out.relations
                .push(Relation::new(&file_id, &chunk.id, EdgeKind::HasSection));

            // Wikilinks.
            for caps in wikilink_re().captures_iter(&chunk.text) {
                let target = caps[1].trim();
                if target.is_empty() {
                    continue;
                }
                let node_id = match self.resolve(target) {
                    Some(path) => path,
                    None => {
                        let title = normalize_entity_name(target);
                        out.synthetic_files.push(target.to_string());
                        title
                    }
                };
                out.relations
                    .push(Relation::new(&chunk.id, node_id, EdgeKind::LinksTo));
            }

            // Markdown links to .md targets; resolve by file stem.
            for caps in md_link_re().captures_iter(&chunk.text) {
                let href = caps[2].trim();
                let stem = href
                    .rsplit('/')
                    .next()
                    .unwrap_or(href)
                    .trim_end_matches(".md");
                let node_id = match self.resolve(stem) {
                    Some(path) => path,
                    None => {
                        out.synthetic_files.push(stem.to_string());
                        normalize_entity_name(stem)
                    }
                };
                out.relations
                    .push(Relation::new(&chunk.id, node_id, EdgeKind::LinksTo));
            }

            // Inline tags. Heading lines never reach chunk text (the chunker
            // folds them into heading_path), so a '#' here is always a tag.
            for caps in inline_tag_re().captures_iter(&chunk.text) {
                let tag = Tag::new(&caps[2]);
                out.relations
                    .push(Relation::new(&chunk.id, &tag.id, EdgeKind::HasTag));
                out.tags.push(tag);
            }
        }

        // PARENT_OF between prefix-related sections.
        for chunk in &doc.chunks {
            if chunk.heading_path.len() > 1 {
                let parent_key = chunk.heading_path[..chunk.heading_path.len() - 1].to_vec();
                if let Some(parent_id) = hierarchy.get(&parent_key) {
                    if parent_id != &chunk.id {
                        out.relations
                            .push(Relation::new(parent_id, &chunk.id, EdgeKind::ParentOf));
                    }
                }
            }
        }

        // Frontmatter key/value pairs.
        if let Some(fm) = &doc.frontmatter {
            extract_frontmatter(fm, &file_id, &mut out);
        }

        Ok(out)
    }
}

fn extract_frontmatter(fm: &serde_yaml::Mapping, file_id: &str, out: &mut ExtractionResult) {
    for (key, value) in fm {
        let Some(key) = key.as_str() else { continue };
        let values: Vec<String> = match value {
            serde_yaml::Value::Sequence(seq) => {
                seq.iter().filter_map(scalar_to_string).collect()
            }
            other => scalar_to_string(other).into_iter().collect(),
        };

        for val in values {
            if key.eq_ignore_ascii_case("tags") {
                let tag = Tag::new(&val);
                out.relations
                    .push(Relation::new(file_id, &tag.id, EdgeKind::HasTag));
                out.tags.push(tag);
            } else {
                let entity = Entity::new(&val, EntityKind::Frontmatter(key.to_string()));
                out.relations.push(Relation::new(
                    file_id,
                    &entity.id,
                    EdgeKind::HasFrontmatter,
                ));
                out.entities.push(entity);
            }
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    fn file_info(path: &str, title: &str) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            title: title.to_string(),
            checksum: "0".repeat(32),
            size_bytes: 0,
            mtime: Utc::now(),
        }
    }

    fn extract(content: &str, titles: &[(&str, &str)]) -> ExtractionResult {
        let path = Path::new("/vault/note.md");
        let doc = chunk_file(path, content, 512, 50);
        let map = titles
            .iter()
            .map(|(t, p)| (normalize_entity_name(t), p.to_string()))
            .collect();
        StructuralExtractor::new(map)
            .extract(&file_info("/vault/note.md", "note"), &doc)
            .unwrap()
    }

    fn edges_of(result: &ExtractionResult, kind: EdgeKind) -> Vec<&Relation> {
        result.relations.iter().filter(|r| r.kind == kind).collect()
    }

    #[test]
    fn test_wikilink_resolves_to_target_first_section() {
        let result = extract(
            "# Note\nSee [[Neural Networks]] for background.\n",
            &[("Neural Networks", "/vault/nn.md")],
        );
        let links = edges_of(&result, EdgeKind::LinksTo);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].target_id,
            crate::models::chunk_id(Path::new("/vault/nn.md"), 0)
        );
        assert!(result.synthetic_files.is_empty());
    }

    #[test]
    fn test_wikilink_alias_and_unresolved() {
        let result = extract("# Note\nSee [[Ghost Page|the ghost]].\n", &[]);
        let links = edges_of(&result, EdgeKind::LinksTo);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_id, "ghost page");
        assert_eq!(result.synthetic_files, vec!["Ghost Page"]);
    }

    #[test]
    fn test_markdown_link_strips_anchor() {
        let result = extract(
            "# Note\nRead [the guide](guides/setup.md#install) first.\n",
            &[("setup", "/vault/guides/setup.md")],
        );
        let links = edges_of(&result, EdgeKind::LinksTo);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].target_id,
            crate::models::chunk_id(Path::new("/vault/guides/setup.md"), 0)
        );
    }

    #[test]
    fn test_inline_tags() {
        let result = extract("# Note\nShipping #rust and #search/hybrid today.\n", &[]);
        let tags: Vec<_> = result.tags.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(tags, vec!["rust", "search/hybrid"]);
        assert_eq!(edges_of(&result, EdgeKind::HasTag).len(), 2);
    }

    #[test]
    fn test_frontmatter_entities_and_tags() {
        let content = "---\nauthor: alice\ntags:\n  - planning\n---\n# Note\nbody\n";
        let result = extract(content, &[]);

        let fm = edges_of(&result, EdgeKind::HasFrontmatter);
        assert_eq!(fm.len(), 1);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "alice");
        assert!(matches!(
            result.entities[0].kind,
            EntityKind::Frontmatter(ref k) if k == "author"
        ));

        let tag_edges = edges_of(&result, EdgeKind::HasTag);
        assert_eq!(tag_edges.len(), 1);
        assert_eq!(tag_edges[0].source_id, "/vault/note.md");
        assert_eq!(tag_edges[0].target_id, "planning");
    }

    #[test]
    fn test_parent_of_follows_heading_prefix() {
        let content = "# Top\nalpha\n## Inner\nbeta\n";
        let result = extract(content, &[]);
        let parents = edges_of(&result, EdgeKind::ParentOf);
        assert_eq!(parents.len(), 1);

        let doc = chunk_file(Path::new("/vault/note.md"), content, 512, 50);
        assert_eq!(parents[0].source_id, doc.chunks[0].id);
        assert_eq!(parents[0].target_id, doc.chunks[1].id);
    }

    #[test]
    fn test_has_section_per_chunk() {
        let result = extract("# A\none\n# B\ntwo\n", &[]);
        let owned = edges_of(&result, EdgeKind::HasSection);
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|r| r.source_id == "/vault/note.md"));
    }
}
