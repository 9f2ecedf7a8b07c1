//! Vault discovery: walk a root directory, yield Markdown files with stable
//! identity and content checksums.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::VaultError;
use crate::models::FileInfo;

/// A discovered file together with its content, ready for chunking.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub info: FileInfo,
    pub content: String,
}

/// Outcome of a discovery pass: readable files plus the ones skipped with a
/// [`VaultError::Read`].
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<VaultError>,
}

fn h1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#\s+(.+)$").expect("static regex"))
}

/// First level-1 heading, or the filename stem if there is none.
fn extract_title(content: &str, path: &Path) -> String {
    if let Some(caps) = h1_re().captures(content) {
        return caps[1].trim().to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn markdown_globs() -> Result<GlobSet, VaultError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["**/*.md", "**/*.markdown"] {
        builder.add(Glob::new(pattern).map_err(|e| VaultError::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| VaultError::Config(e.to_string()))
}

fn exclude_globs() -> Result<GlobSet, VaultError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["**/.git/**", "**/node_modules/**", "**/.obsidian/**"] {
        builder.add(Glob::new(pattern).map_err(|e| VaultError::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| VaultError::Config(e.to_string()))
}

/// Recursively discover Markdown files under `root`.
///
/// Individual unreadable files are reported in [`Discovery::skipped`] and do
/// not abort the batch; a missing or non-directory root is a
/// [`VaultError::Config`]. Results are sorted by path so indexing order is
/// deterministic.
pub fn discover_files(root: &Path) -> Result<Discovery, VaultError> {
    if !root.is_dir() {
        return Err(VaultError::Config(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let include = markdown_globs()?;
    let exclude = exclude_globs()?;
    let mut discovery = Discovery::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                discovery.skipped.push(VaultError::Read {
                    path: e.path().map(PathBuf::from).unwrap_or_default(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) || !include.is_match(relative) {
            continue;
        }

        match read_source_file(path) {
            Ok(file) => discovery.files.push(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                discovery.skipped.push(e);
            }
        }
    }

    discovery
        .files
        .sort_by(|a, b| a.info.path.cmp(&b.info.path));
    tracing::info!(
        files = discovery.files.len(),
        skipped = discovery.skipped.len(),
        root = %root.display(),
        "discovered markdown files"
    );
    Ok(discovery)
}

/// Read one file and compute its identity: title, checksum, size, mtime.
pub fn read_source_file(path: &Path) -> Result<SourceFile, VaultError> {
    let read_err = |e: std::io::Error| VaultError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let content = std::fs::read_to_string(path).map_err(read_err)?;
    let metadata = std::fs::metadata(path).map_err(read_err)?;
    let mtime: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let digest = Sha256::digest(content.as_bytes());
    let mut checksum = String::with_capacity(32);
    for byte in &digest[..16] {
        checksum.push_str(&format!("{:02x}", byte));
    }

    Ok(SourceFile {
        info: FileInfo {
            path: path.to_path_buf(),
            title: extract_title(&content, path),
            checksum,
            size_bytes: metadata.len(),
            mtime,
        },
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_title_from_h1() {
        let title = extract_title("intro text\n# Deploying to Prod\nbody", Path::new("notes.md"));
        assert_eq!(title, "Deploying to Prod");
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let title = extract_title("no headings here", Path::new("/vault/cooking.md"));
        assert_eq!(title, "cooking");
    }

    #[test]
    fn test_discover_finds_both_extensions() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "# A").unwrap();
        fs::write(tmp.path().join("b.markdown"), "# B").unwrap();
        fs::write(tmp.path().join("c.txt"), "not markdown").unwrap();

        let discovery = discover_files(tmp.path()).unwrap();
        assert_eq!(discovery.files.len(), 2);
        assert!(discovery.skipped.is_empty());
    }

    #[test]
    fn test_discover_sorted_and_deterministic() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("zebra.md"), "z").unwrap();
        fs::write(tmp.path().join("apple.md"), "a").unwrap();

        let d1 = discover_files(tmp.path()).unwrap();
        let d2 = discover_files(tmp.path()).unwrap();
        let names1: Vec<_> = d1.files.iter().map(|f| f.info.path.clone()).collect();
        let names2: Vec<_> = d2.files.iter().map(|f| f.info.path.clone()).collect();
        assert_eq!(names1, names2);
        assert!(names1[0].ends_with("apple.md"));
    }

    #[test]
    fn test_discover_missing_root_fails() {
        assert!(discover_files(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "one").unwrap();
        let first = read_source_file(&path).unwrap().info.checksum;
        fs::write(&path, "two").unwrap();
        let second = read_source_file(&path).unwrap().info.checksum;
        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
    }
}
