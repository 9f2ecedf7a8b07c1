//! Heading-scoped, token-bounded chunking of Markdown content.
//!
//! Splits on ATX headings (`#`..`######`), tracking the heading hierarchy as
//! a stack so every chunk knows its ancestor path. Sections that exceed the
//! token budget are further split at sentence boundaries with a sliding
//! window of shared overlap. Frontmatter is extracted separately and
//! attached to the file; it is never emitted as a chunk. Code fences are
//! opaque: a `#` line inside a fence never opens a section.
//!
//! Chunk IDs hash `file_path:ordinal`, so re-chunking an unchanged file
//! reproduces identical IDs — the property the four stores rely on for
//! referential integrity.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::VaultError;
use crate::models::{chunk_id, Chunk};
use crate::text::{estimate_tokens, split_sentences};

/// A file after chunking: retrieval chunks plus any frontmatter mapping.
#[derive(Debug, Default)]
pub struct ChunkedFile {
    pub chunks: Vec<Chunk>,
    pub frontmatter: Option<serde_yaml::Mapping>,
    /// Malformed frontmatter, recovered by chunking the fences as opaque
    /// body text. Reported in the batch summary; never aborts the file.
    pub parse_error: Option<VaultError>,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("static regex"))
}

/// One heading-delimited region of the source: level 0 is preamble text
/// before the first heading.
struct RawSection {
    level: u8,
    heading: String,
    body: String,
    start_byte: usize,
    end_byte: usize,
}

/// Strip YAML frontmatter between leading `---` fences.
///
/// Returns the parsed mapping, the byte offset where the document body
/// begins, and the parse error for malformed YAML — in which case the
/// fences stay in the body as opaque text and no mapping is returned.
fn split_frontmatter(content: &str) -> (Option<serde_yaml::Mapping>, usize, Option<String>) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, 0, None);
    };
    let Some(end) = rest.find("\n---\n").map(|i| i + 1) else {
        return (None, 0, None);
    };
    let raw = &rest[..end - 1];
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Mapping(map)) => {
            // 4 = "---\n", end = yaml + "\n", 4 = "---\n"
            (Some(map), 4 + end + 4, None)
        }
        Ok(_) => (None, 0, None),
        Err(e) => (None, 0, Some(e.to_string())),
    }
}

/// Split the body into heading-delimited sections, ignoring headings inside
/// code fences.
fn parse_sections(content: &str, base_offset: usize) -> Vec<RawSection> {
    let mut sections = Vec::new();
    let mut in_fence = false;

    let mut current_level: u8 = 0;
    let mut current_heading = String::new();
    let mut current_start = base_offset;
    let mut current_body = String::new();

    let mut offset = base_offset;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence {
            None
        } else {
            heading_re().captures(line.trim_end_matches('\n'))
        };

        if let Some(caps) = heading {
            sections.push(RawSection {
                level: current_level,
                heading: std::mem::take(&mut current_heading),
                body: std::mem::take(&mut current_body),
                start_byte: current_start,
                end_byte: offset,
            });
            current_level = caps[1].len() as u8;
            current_heading = caps[2].trim().to_string();
            current_start = offset;
        } else {
            current_body.push_str(line);
        }
        offset += line.len();
    }
    sections.push(RawSection {
        level: current_level,
        heading: current_heading,
        body: current_body,
        start_byte: current_start,
        end_byte: offset,
    });

    sections
}

/// Split `text` into pieces that each fit within `max_tokens`, preferring
/// sentence boundaries. Consecutive pieces share roughly `overlap_tokens`
/// of trailing context. A single sentence longer than the budget is kept
/// whole, never discarded.
fn split_with_overlap(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    let mut pieces = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let sent_tokens = estimate_tokens(&sentence);

        if !current.is_empty() && current_tokens + sent_tokens > max_tokens {
            pieces.push(current.join(" "));

            // Carry the tail of the previous piece forward as overlap.
            let mut overlap: Vec<String> = Vec::new();
            let mut overlap_tok = 0usize;
            for prev in current.iter().rev() {
                let prev_tok = estimate_tokens(prev);
                if overlap_tok + prev_tok > overlap_tokens && !overlap.is_empty() {
                    break;
                }
                overlap.insert(0, prev.clone());
                overlap_tok += prev_tok;
            }
            current = overlap;
            current_tokens = overlap_tok;
        }

        current_tokens += sent_tokens;
        current.push(sentence);
    }

    if !current.is_empty() {
        pieces.push(current.join(" "));
    }
    pieces
}

/// Chunk a Markdown document.
///
/// Every heading opens a section; the heading hierarchy determines each
/// chunk's ancestor path. The joined heading path is prepended to the chunk
/// text (separated by a blank line) so lexical engines can match contextual
/// terms. Sections whose estimated token count exceeds `max_tokens` are
/// split with [`split_with_overlap`]; sub-chunks inherit the heading path
/// and receive ordinals in document order.
///
/// A file with no headings yields a single chunk with an empty heading
/// path. Sections with no body text yield no chunk of their own; their
/// heading still reaches deeper chunks through the heading path.
pub fn chunk_file(
    path: &Path,
    content: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> ChunkedFile {
    let (frontmatter, body_start, parse_error) = split_frontmatter(content);
    let raw_sections = parse_sections(&content[body_start..], body_start);

    let mut out = ChunkedFile {
        frontmatter,
        parse_error: parse_error.map(|message| VaultError::Parse {
            path: path.to_path_buf(),
            message,
        }),
        ..Default::default()
    };

    // hierarchy[1..=6] holds the active heading at each level; a new heading
    // clears everything deeper.
    let mut hierarchy: [String; 7] = Default::default();
    let mut ordinal: i64 = 0;

    for raw in raw_sections {
        let heading_path: Vec<String> = if raw.level > 0 {
            hierarchy[raw.level as usize] = raw.heading.clone();
            for slot in hierarchy.iter_mut().skip(raw.level as usize + 1) {
                slot.clear();
            }
            hierarchy[1..=raw.level as usize]
                .iter()
                .filter(|h| !h.is_empty())
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let body = raw.body.trim();
        if body.is_empty() {
            continue;
        }

        let section_text = if heading_path.is_empty() {
            body.to_string()
        } else {
            format!("{}\n\n{}", heading_path.join(" > "), body)
        };

        let token_count = estimate_tokens(&section_text);
        let texts = if token_count <= max_tokens {
            vec![section_text]
        } else {
            split_with_overlap(&section_text, max_tokens, overlap_tokens)
        };

        for text in texts {
            let tokens = estimate_tokens(&text);
            out.chunks.push(Chunk {
                id: chunk_id(path, ordinal),
                file_path: path.to_path_buf(),
                ordinal,
                heading_path: heading_path.clone(),
                level: raw.level,
                text,
                start_byte: raw.start_byte,
                end_byte: raw.end_byte,
                tokens,
            });
            ordinal += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunk(content: &str) -> ChunkedFile {
        chunk_file(&PathBuf::from("/vault/test.md"), content, 512, 50)
    }

    #[test]
    fn test_no_headings_single_chunk() {
        let out = chunk("Just a paragraph of plain text without any headings.");
        assert_eq!(out.chunks.len(), 1);
        assert!(out.chunks[0].heading_path.is_empty());
        assert_eq!(out.chunks[0].level, 0);
        assert_eq!(out.chunks[0].ordinal, 0);
    }

    #[test]
    fn test_heading_hierarchy_tracked() {
        let out = chunk("# Top\nalpha\n## Inner\nbeta\n# Next\ngamma\n");
        assert_eq!(out.chunks.len(), 3);
        assert_eq!(out.chunks[0].heading_path, vec!["Top"]);
        assert_eq!(out.chunks[1].heading_path, vec!["Top", "Inner"]);
        // A new H1 clears the deeper levels.
        assert_eq!(out.chunks[2].heading_path, vec!["Next"]);
    }

    #[test]
    fn test_heading_path_prefixed_into_text() {
        let out = chunk("# Deploy\n## Steps\nRun the script.\n");
        let steps = out
            .chunks
            .iter()
            .find(|c| c.heading() == "Steps")
            .expect("steps chunk");
        assert!(steps.text.starts_with("Deploy > Steps"));
        assert!(steps.text.contains("Run the script."));
    }

    #[test]
    fn test_empty_section_produces_no_chunk() {
        let out = chunk("# Empty\n# Full\ncontent here\n");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].heading_path, vec!["Full"]);
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let out = chunk("intro paragraph\n\n# First\nbody\n");
        assert_eq!(out.chunks.len(), 2);
        assert!(out.chunks[0].heading_path.is_empty());
        assert_eq!(out.chunks[1].heading_path, vec!["First"]);
    }

    #[test]
    fn test_frontmatter_extracted_not_chunked() {
        let out = chunk("---\ntags:\n  - rust\nauthor: alice\n---\n# Note\nbody\n");
        let fm = out.frontmatter.expect("frontmatter");
        assert!(fm.contains_key("tags"));
        assert!(fm.contains_key("author"));
        assert_eq!(out.chunks.len(), 1);
        assert!(!out.chunks[0].text.contains("alice"));
    }

    #[test]
    fn test_malformed_frontmatter_is_opaque() {
        let out = chunk("---\ntags: [unclosed\n---\n# Note\nbody\n");
        assert!(out.frontmatter.is_none());
        assert!(matches!(
            out.parse_error,
            Some(VaultError::Parse { .. })
        ));
        // The fences stay in the body as a preamble chunk.
        assert!(out.chunks[0].text.contains("unclosed"));
        assert!(out.chunks.iter().any(|c| c.heading() == "Note"));
    }

    #[test]
    fn test_code_fences_are_opaque() {
        let out = chunk("# Code\n```\n# not a heading\nmore code\n```\nafter\n");
        assert_eq!(out.chunks.len(), 1);
        assert!(out.chunks[0].text.contains("# not a heading"));
    }

    #[test]
    fn test_chunk_ids_stable_across_runs() {
        let content = "# A\none\n# B\ntwo\n";
        let first = chunk(content);
        let second = chunk(content);
        let ids1: Vec<_> = first.chunks.iter().map(|c| c.id.clone()).collect();
        let ids2: Vec<_> = second.chunks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn test_section_at_budget_is_single_chunk() {
        // 512 tokens at 4 chars/token = 2048 chars, as 16 sentences of 128.
        let sentence = format!("{}. ", "A".repeat(126));
        let body = format!("{}{}.", sentence.repeat(15), "A".repeat(127));
        assert_eq!(estimate_tokens(&body), 512);
        let out = chunk(&body);
        assert_eq!(out.chunks.len(), 1);
    }

    #[test]
    fn test_oversized_section_splits_with_overlap() {
        let sentence = format!("{}. ", "A".repeat(126));
        let body = sentence.repeat(20);
        assert!(estimate_tokens(&body) > 512);
        let out = chunk(&body);
        assert!(out.chunks.len() >= 2, "expected a split, got {}", out.chunks.len());

        // Consecutive pieces share trailing context.
        let first = &out.chunks[0].text;
        let second = &out.chunks[1].text;
        let tail: String = first
            .chars()
            .skip(first.chars().count().saturating_sub(100))
            .collect();
        assert!(second.contains(tail.trim()));

        // Ordinals preserve document order.
        for (i, c) in out.chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64);
        }
    }

    #[test]
    fn test_section_offsets_cover_source() {
        let content = "# One\nalpha\n# Two\nbeta\n";
        let out = chunk(content);
        assert_eq!(out.chunks.len(), 2);
        assert!(out.chunks[0].start_byte < out.chunks[1].start_byte);
        assert_eq!(out.chunks[1].end_byte, content.len());
    }
}
