//! Registration plate text normalization and extraction
//!
//! OCR output is noisy: mixed case, stray punctuation, spaces between glyphs.
//! [`extract_plate`] recovers a plate-shaped substring from such text, while
//! [`normalize_plate`] only canonicalizes and never rejects input (used for
//! manually entered plates and for comparison/display).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Current UK format: two letters, two digits, three letters
    static ref STRICT_PLATE: Regex =
        Regex::new(r"[A-Z]{2}[0-9]{2}[A-Z]{3}").expect("strict plate pattern is valid");
    static ref LOOSE_PLATE: Regex =
        Regex::new(r"[A-Z0-9]{5,8}").expect("loose plate pattern is valid");
}

/// Uppercase and strip everything outside `[A-Z0-9]`.
///
/// No length or pattern constraint is applied.
pub fn normalize_plate(input: &str) -> String {
    input
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Text split into the two forms used for matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateCandidates {
    /// All `[A-Z0-9]` characters with separators removed
    pub condensed: String,
    /// Whitespace-delimited tokens after punctuation was turned into spaces
    pub tokens: Vec<String>,
}

impl PlateCandidates {
    pub fn from_text(raw: &str) -> Self {
        let spaced: String = raw
            .chars()
            .map(|c| c.to_ascii_uppercase())
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect();

        let condensed = spaced.chars().filter(|c| !c.is_whitespace()).collect();
        let tokens = spaced.split_whitespace().map(str::to_string).collect();

        Self { condensed, tokens }
    }
}

/// Extract a plate from raw OCR text.
///
/// Matching order:
/// 1. strict pattern on the condensed text
/// 2. loose 5-8 character run on the condensed text
/// 3. strict pattern per token
/// 4. loose run per token
///
/// Returns an empty string when nothing plate-shaped is found; callers treat
/// that as "no detection", not as an error.
pub fn extract_plate(raw: &str) -> String {
    let candidates = PlateCandidates::from_text(raw);

    if let Some(m) = STRICT_PLATE.find(&candidates.condensed) {
        return m.as_str().to_string();
    }

    if let Some(m) = LOOSE_PLATE.find(&candidates.condensed) {
        return m.as_str().to_string();
    }

    let tokens = &candidates.tokens;

    if let Some(m) = tokens.iter().find_map(|t| STRICT_PLATE.find(t)) {
        return m.as_str().to_string();
    }

    tokens
        .iter()
        .find_map(|t| LOOSE_PLATE.find(t))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate("LM22 XPT"), "LM22XPT");
        assert_eq!(normalize_plate("lm22-xpt"), "LM22XPT");
        assert_eq!(normalize_plate(""), "");
        assert_eq!(normalize_plate("??##??"), "");
        // Never rejects on length
        assert_eq!(normalize_plate("a"), "A");
        assert_eq!(normalize_plate("abcdefghijkl"), "ABCDEFGHIJKL");
    }

    #[test]
    fn test_extract_strict_from_spaced_glyphs() {
        assert_eq!(extract_plate("L M 2 2 X P T"), "LM22XPT");
    }

    #[test]
    fn test_extract_strict_from_noisy_text() {
        assert_eq!(extract_plate("gb: lm22.xpt"), "LM22XPT");
        assert_eq!(extract_plate("..lm22 xpt.."), "LM22XPT");
    }

    #[test]
    fn test_strict_wins_over_earlier_loose_run() {
        // The strict plate sits after a longer loose run
        assert_eq!(extract_plate("1234 AB12CDE"), "AB12CDE");
    }

    #[test]
    fn test_extract_loose_run() {
        assert_eq!(extract_plate("k 123 45"), "K12345");
        assert_eq!(extract_plate("ab1 2cd3 efg"), "AB12CD3E");
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_plate("??##??"), "");
        assert_eq!(extract_plate(""), "");
        assert_eq!(extract_plate("ab 12"), "");
    }

    #[test]
    fn test_candidates() {
        let candidates = PlateCandidates::from_text("lm22-xpt / 9");
        assert_eq!(candidates.condensed, "LM22XPT9");
        assert_eq!(candidates.tokens, vec!["LM22", "XPT", "9"]);
    }
}
