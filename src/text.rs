//! Text processing shared by the chunker, the BM25 builder, and query
//! expansion: tokenisation with a stop list, token-count estimation, and a
//! sentence splitter.
//!
//! All three consumers must agree on the tokeniser — the sparse retriever
//! scores query tokens against index tokens — so the logic lives here and
//! nowhere else.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Approximate chars-per-token ratio used by the token estimator. Frozen
/// into the index manifest so a rebuilt binary cannot silently change chunk
/// boundaries.
pub const CHARS_PER_TOKEN: usize = 4;

/// English stop words plus markup noise. Tokens in this list carry no
/// lexical signal and are dropped before BM25 scoring.
const STOP_WORDS: &str = "i me my myself we our ours ourselves you your yours \
yourself yourselves he him his himself she her hers herself it its itself \
they them their theirs themselves what which who whom this that these those \
am is are was were be been being have has had having do does did doing a an \
the and but if or because as until while of at by for with about against \
between into through during before after above below to from up down in out \
on off over under again further then once here there when where why how all \
any both each few more most other some such no nor not only own same so than \
too very s t can will just don should now also always among another anyway \
anywhere become becomes behind beside besides beyond cannot could either \
else elsewhere enough etc even ever every everyone everything everywhere \
except however indeed instead latter least less many may meanwhile might \
moreover much must neither never nevertheless nobody none nothing nowhere \
often otherwise per perhaps please rather say see seem several since \
somehow someone something sometimes somewhere still though throughout thus \
together toward towards upon us via want well whatever whenever wherever \
whether within without would yet subgraph direction flowchart mindmap graph \
classdef linkstyle click style fill color stroke width font size height \
margin padding left right center bold italic div span img src alt href class";

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.split_whitespace().collect())
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("static regex"))
}

fn hex_color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{3,8}$").expect("static regex"))
}

/// True if a lowercase token is a stop word or hex-colour noise.
pub fn is_noise_token(token: &str) -> bool {
    if stop_words().contains(token) {
        return true;
    }
    // Hex colour codes from inline styles and mermaid diagrams (f39c12, fff).
    hex_color_re().is_match(token) && token.chars().any(|c| c.is_ascii_alphabetic())
}

/// Lowercase word tokeniser with stop-word removal. The same function runs
/// at index time (BM25 corpus) and query time.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_re()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|t| !is_noise_token(t))
        .collect()
}

/// Rough token count estimate (~4 chars per token). Never returns 0.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / CHARS_PER_TOKEN).max(1)
}

/// Split text into sentences on `.!?` followed by whitespace and an
/// uppercase letter. Decimal points and lowercase abbreviations survive.
pub fn split_sentences(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let boundary = RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static regex"));

    let mut sentences = Vec::new();
    let mut start = 0;
    for m in boundary.find_iter(text) {
        let next = text[m.end()..].chars().next();
        if next.map_or(false, |c| c.is_uppercase()) {
            // Keep the terminating punctuation with the sentence.
            let sentence = text[start..m.start() + 1].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = m.end();
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_drops_stop_words() {
        let tokens = tokenize("The Transformer uses Attention");
        assert_eq!(tokens, vec!["transformer", "uses", "attention"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("the and of").is_empty());
    }

    #[test]
    fn test_hex_colors_are_noise() {
        assert!(is_noise_token("f39c12"));
        assert!(is_noise_token("fff"));
        // Pure digits are not colours.
        assert!(!is_noise_token("2024"));
        assert!(!is_noise_token("kubernetes"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(2048)), 512);
        assert_eq!(estimate_tokens(&"x".repeat(2052)), 513);
    }

    #[test]
    fn test_split_sentences() {
        let sents = split_sentences("First one. Second one! Third?");
        assert_eq!(sents, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sents = split_sentences("Version 3.5 shipped. It was fast.");
        assert_eq!(sents.len(), 2);
        assert_eq!(sents[0], "Version 3.5 shipped.");
    }

    #[test]
    fn test_split_sentences_no_boundary() {
        let sents = split_sentences("just a fragment without punctuation");
        assert_eq!(sents.len(), 1);
    }
}
