//! Plain-text documents and their words.
//!
//! A document is a URL plus its text. Its words are the whitespace-separated
//! tokens of every non-script line, minus tokens that start with
//! punctuation or are too long to be a key. Words are case-sensitive and
//! kept as written.

use std::collections::BTreeSet;

use crate::btree::MAX_KEY_LEN;

/// Characters that disqualify a token when they start it.
const LEADING_PUNCTUATION: &[char] = &[';', '.', ',', '!', ':', '&', '-', '"', '/'];

/// A document to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    url: String,
    text: String,
}

impl Document {
    #[must_use]
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct words of the document, in ascending order.
    #[must_use]
    pub fn words(&self) -> BTreeSet<String> {
        self.text
            .lines()
            .filter(|line| !is_script(line))
            .flat_map(str::split_whitespace)
            .filter(|token| {
                !token.starts_with(LEADING_PUNCTUATION) && token.len() <= MAX_KEY_LEN
            })
            .map(str::to_owned)
            .collect()
    }
}

/// True for lines that look like inline script: a `var ` declaration or a
/// `function(` expression starting at a word boundary.
fn is_script(line: &str) -> bool {
    starts_at_word_boundary(line, "var ") || starts_at_word_boundary(line, "function(")
}

fn starts_at_word_boundary(line: &str, needle: &str) -> bool {
    line.match_indices(needle).any(|(i, _)| {
        line[..i]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        Document::new("http://example.com", text)
            .words()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_words_sorted_and_deduplicated() {
        assert_eq!(
            words("the cat sat on the mat\nthe end"),
            vec!["cat", "end", "mat", "on", "sat", "the"]
        );
    }

    #[test]
    fn test_words_keep_case_and_trailing_punctuation() {
        assert_eq!(
            words("Hello world, hello again world"),
            vec!["Hello", "again", "hello", "world", "world,"]
        );
    }

    #[test]
    fn test_words_drop_leading_punctuation() {
        assert_eq!(
            words("keep ;semi .dot ,comma !bang :colon &amp -dash \"quote /slash too"),
            vec!["keep", "too"]
        );
    }

    #[test]
    fn test_words_skip_script_lines() {
        let text = "intro text\nvar x = 1;\n$(function() { go(); })\noutro";
        assert_eq!(words(text), vec!["intro", "outro", "text"]);
    }

    #[test]
    fn test_script_detection_needs_word_boundary() {
        assert!(is_script("var count = 0"));
        assert!(is_script("  x = function(a) {}"));
        assert!(!is_script("cavar something"));
        assert!(!is_script("myfunction(x)"));
        assert!(!is_script("variable names"));
    }

    #[test]
    fn test_words_drop_oversized_tokens() {
        let text = format!("hello {} world", "x".repeat(MAX_KEY_LEN + 1));
        assert_eq!(words(&text), vec!["hello", "world"]);
        let longest = "y".repeat(MAX_KEY_LEN);
        assert!(words(&longest).contains(&longest));
    }

    #[test]
    fn test_empty_document() {
        assert!(words("").is_empty());
        assert!(words("   \n\t\n").is_empty());
    }

    #[test]
    fn test_accessors() {
        let doc = Document::new("file:///tmp/a.txt", "body");
        assert_eq!(doc.url(), "file:///tmp/a.txt");
        assert_eq!(doc.text(), "body");
    }
}
