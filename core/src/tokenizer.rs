use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    // Unicode-aware word runs: letters, digits and underscore.
    static ref RE: Regex = Regex::new(r"\w+").expect("valid regex");
}

/// Tokenize text into lower-cased `\w+` runs, in input order.
///
/// Punctuation and whitespace only ever separate tokens; they are never part
/// of one. Empty or whitespace-only input yields an empty sequence.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let lowered = text.to_lowercase();
    RE.find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

/// Count occurrences of each distinct token.
pub fn term_counts(tokens: &[String]) -> HashMap<&str, u32> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("The Cat sat.");
        assert_eq!(t, vec!["the", "cat", "sat"]);
    }

    #[test]
    fn punctuation_is_a_separator() {
        let t = tokenize("well-known, snake_case! x2y (42)");
        assert_eq!(t, vec!["well", "known", "snake_case", "x2y", "42"]);
    }

    #[test]
    fn empty_and_whitespace_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t ").is_empty());
        assert!(tokenize("?!... --").is_empty());
    }

    #[test]
    fn counts_repeated_terms() {
        let t = tokenize("cat Cat CAT dog");
        let counts = term_counts(&t);
        assert_eq!(counts.get("cat"), Some(&3));
        assert_eq!(counts.get("dog"), Some(&1));
    }
}
