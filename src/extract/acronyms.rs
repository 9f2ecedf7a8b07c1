//! Acronym harvesting for query expansion.
//!
//! Mines acronym definitions from chunk text using common prose patterns:
//!
//! - `Security Information and Event Management (SIEM)`
//! - `SIEM (Security Information and Event Management)`
//! - `SIEM stands for Security Information and Event Management`
//! - `Mean Time To Identify, or MTTI`
//! - table rows: `| **MTTD** | Mean Time to Detect |`
//!
//! Candidates are validated by checking that the acronym is a subsequence
//! of the expansion's first letters (so connective words like "and" or "of"
//! may be skipped). The merged corpus-wide dictionary is persisted as JSON
//! in the index directory and loaded by the query expander.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::VaultError;
use crate::models::Chunk;

fn patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"([A-Z][A-Za-z\s&]+?)\s*\(([A-Z]{2,})\)",
            r"([A-Z]{2,})\s*\(([A-Z][A-Za-z\s&]+?)\)",
            r"([A-Z]{2,})\s+(?:stands for|is short for|means)\s+([A-Z][A-Za-z\s&]+)",
            r"([A-Z][A-Za-z\s]+?),\s+(?:or|abbreviated as)\s+([A-Z]{2,})",
            r"\|\s*\*?\*?([A-Z]{2,})\*?\*?\s*\|\s*([A-Z][A-Za-z\s]+?)\s*\|",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn is_acronym_token(s: &str) -> bool {
    s.len() >= 2 && s.chars().all(|c| c.is_ascii_uppercase())
}

/// True when the acronym matches the expansion's first letters as a
/// subsequence.
fn is_valid_acronym(acronym: &str, expansion: &str) -> bool {
    let first_letters: Vec<char> = expansion
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .filter(|c| c.is_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let mut idx = 0;
    for letter in acronym.chars().map(|c| c.to_ascii_uppercase()) {
        match first_letters[idx..].iter().position(|&c| c == letter) {
            Some(pos) => idx += pos + 1,
            None => return false,
        }
    }
    true
}

/// Extract acronym definitions from one text.
pub fn extract_acronyms(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for pattern in patterns() {
        for caps in pattern.captures_iter(text) {
            let part1 = caps[1].trim();
            let part2 = caps[2].trim();

            let (acronym, expansion) = if is_acronym_token(part1) {
                (part1, part2)
            } else if is_acronym_token(part2) {
                (part2, part1)
            } else {
                continue;
            };

            if is_valid_acronym(acronym, expansion) {
                found
                    .entry(acronym.to_string())
                    .or_default()
                    .insert(expansion.to_string());
            }
        }
    }

    found
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

/// Merge acronym definitions from every chunk in the corpus.
pub fn harvest(chunks: &[Chunk]) -> BTreeMap<String, Vec<String>> {
    let mut combined: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for chunk in chunks {
        for (acronym, expansions) in extract_acronyms(&chunk.text) {
            combined.entry(acronym).or_default().extend(expansions);
        }
    }
    combined
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

pub fn save(dict: &BTreeMap<String, Vec<String>>, path: &Path) -> Result<(), VaultError> {
    let json =
        serde_json::to_string_pretty(dict).map_err(|e| VaultError::Storage(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| VaultError::Storage(e.to_string()))
}

pub fn load(path: &Path) -> Result<BTreeMap<String, Vec<String>>, VaultError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| VaultError::Storage(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| VaultError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_then_parenthesised_acronym() {
        let dict = extract_acronyms(
            "Security Information and Event Management (SIEM) is a platform.",
        );
        assert_eq!(
            dict.get("SIEM").map(Vec::as_slice),
            Some(&["Security Information and Event Management".to_string()][..])
        );
    }

    #[test]
    fn test_acronym_then_parenthesised_expansion() {
        let dict = extract_acronyms("MTTI (Mean Time To Identify) measures detection speed.");
        assert_eq!(
            dict.get("MTTI").map(Vec::as_slice),
            Some(&["Mean Time To Identify".to_string()][..])
        );
    }

    #[test]
    fn test_stands_for() {
        let dict = extract_acronyms("RRF stands for Reciprocal Rank Fusion here.");
        assert!(dict.contains_key("RRF"));
    }

    #[test]
    fn test_table_row() {
        let dict = extract_acronyms("| **MTTD** | Mean Time to Detect |");
        assert!(dict.contains_key("MTTD"));
    }

    #[test]
    fn test_subsequence_validation_allows_skipped_words() {
        // "and" is skipped: CIA from Confidentiality Integrity and Availability.
        assert!(is_valid_acronym(
            "CIA",
            "Confidentiality Integrity and Availability"
        ));
        assert!(!is_valid_acronym("XYZ", "Mean Time To Identify"));
    }

    #[test]
    fn test_mismatched_pairs_rejected() {
        let dict = extract_acronyms("The team (NASA) shipped it.");
        assert!(!dict.contains_key("NASA"));
    }

    #[test]
    fn test_roundtrip_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("acronyms.json");
        let dict = extract_acronyms("NN (Neural Network) basics.");
        save(&dict, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(dict, loaded);
    }
}
