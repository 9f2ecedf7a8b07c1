//! Query expansion: acronyms and heading structure.
//!
//! Expansion is a pure function over two dictionaries loaded before the
//! call — the harvested acronym dictionary and the corpus heading map. It
//! never consults the vector or graph stores.
//!
//! - **Acronym expansion** appends (never substitutes) the expansions of
//!   any query token that matches a known acronym: exact match first, then
//!   fuzzy match with edit distance ≤ 1 for tokens of length ≥ 3.
//! - **Heading-structure expansion**: a query token matching a known
//!   section heading (case-insensitive) contributes the heading's ancestor
//!   titles as additional context terms.

use std::collections::{BTreeMap, HashMap};

/// A query after expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub original: String,
    /// Terms appended by expansion, in discovery order.
    pub added_terms: Vec<String>,
    /// Query text handed to the retrievers.
    pub expanded_text: String,
}

pub struct QueryExpander {
    /// Uppercase acronym → expansions.
    acronyms: BTreeMap<String, Vec<String>>,
    /// Lowercased heading text → ancestor titles.
    heading_ancestors: HashMap<String, Vec<String>>,
}

impl QueryExpander {
    pub fn new(
        acronyms: BTreeMap<String, Vec<String>>,
        heading_paths: &[Vec<String>],
    ) -> Self {
        let mut heading_ancestors: HashMap<String, Vec<String>> = HashMap::new();
        for path in heading_paths {
            let Some((own, ancestors)) = path.split_last() else {
                continue;
            };
            if ancestors.is_empty() {
                continue;
            }
            heading_ancestors
                .entry(own.to_lowercase())
                .or_insert_with(|| ancestors.to_vec());
        }
        QueryExpander {
            acronyms,
            heading_ancestors,
        }
    }

    /// Expand `query`. The original text is always preserved; discovered
    /// terms are appended.
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let mut added: Vec<String> = Vec::new();

        for token in query.split_whitespace() {
            // Acronym candidates: the token reduced to its uppercase letters.
            let letters: String = token
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_uppercase())
                .collect();

            if letters.len() >= 2 {
                if let Some(expansions) = self.lookup_acronym(&letters) {
                    for expansion in expansions {
                        if !added.contains(expansion) {
                            added.push(expansion.clone());
                        }
                    }
                }
            }

            // Heading-structure context.
            let lower = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if let Some(ancestors) = self.heading_ancestors.get(&lower) {
                for ancestor in ancestors {
                    if !added.contains(ancestor) {
                        added.push(ancestor.clone());
                    }
                }
            }
        }

        let expanded_text = if added.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, added.join(" "))
        };

        ExpandedQuery {
            original: query.to_string(),
            added_terms: added,
            expanded_text,
        }
    }

    /// Exact lookup first, then fuzzy (edit distance ≤ 1, length ≥ 3).
    fn lookup_acronym(&self, token: &str) -> Option<&Vec<String>> {
        if let Some(hit) = self.acronyms.get(token) {
            return Some(hit);
        }
        if token.len() < 3 {
            return None;
        }
        let mut best: Option<(&String, usize)> = None;
        for known in self.acronyms.keys() {
            let distance = edit_distance(token, known);
            if distance <= 1 && best.map_or(true, |(_, d)| distance < d) {
                best = Some((known, distance));
            }
        }
        best.and_then(|(key, _)| self.acronyms.get(key))
    }
}

/// Levenshtein edit distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, &cb) in b.iter().enumerate() {
            let insertions = previous[j + 1] + 1;
            let deletions = current[j] + 1;
            let substitutions = previous[j] + usize::from(ca != cb);
            current.push(insertions.min(deletions).min(substitutions));
        }
        previous = current;
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> QueryExpander {
        let mut acronyms = BTreeMap::new();
        acronyms.insert(
            "NN".to_string(),
            vec!["Neural Networks".to_string()],
        );
        acronyms.insert(
            "SIEM".to_string(),
            vec!["Security Information and Event Management".to_string()],
        );
        let headings = vec![
            vec!["Deploy".to_string(), "Steps".to_string()],
            vec!["Deploy".to_string()],
        ];
        QueryExpander::new(acronyms, &headings)
    }

    #[test]
    fn test_exact_acronym_appended_not_substituted() {
        let expanded = expander().expand("NN basics");
        assert_eq!(expanded.expanded_text, "NN basics Neural Networks");
        assert!(expanded.expanded_text.contains("NN"));
        assert_eq!(expanded.added_terms, vec!["Neural Networks"]);
    }

    #[test]
    fn test_fuzzy_match_within_distance_one() {
        // "SIEN" is one substitution away from "SIEM".
        let expanded = expander().expand("SIEN alerts");
        assert!(expanded
            .added_terms
            .contains(&"Security Information and Event Management".to_string()));
    }

    #[test]
    fn test_fuzzy_match_requires_length_three() {
        // "NX" is one edit from "NN" but too short for fuzzy matching.
        let expanded = expander().expand("NX");
        assert!(expanded.added_terms.is_empty());
    }

    #[test]
    fn test_heading_contributes_ancestors() {
        let expanded = expander().expand("steps for release");
        assert_eq!(expanded.added_terms, vec!["Deploy"]);
        assert_eq!(expanded.expanded_text, "steps for release Deploy");
    }

    #[test]
    fn test_no_expansion_is_identity() {
        let expanded = expander().expand("plain query words");
        assert_eq!(expanded.expanded_text, "plain query words");
        assert!(expanded.added_terms.is_empty());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("SIEM", "SIEM"), 0);
        assert_eq!(edit_distance("SIEN", "SIEM"), 1);
        assert_eq!(edit_distance("SI", "SIEM"), 2);
        assert_eq!(edit_distance("", "AB"), 2);
    }

    #[test]
    fn test_punctuation_stripped_for_lookup() {
        let expanded = expander().expand("what is NN?");
        assert!(expanded.added_terms.contains(&"Neural Networks".to_string()));
    }
}
