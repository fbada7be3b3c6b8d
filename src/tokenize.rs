//! Text normalization into canonical search tags.
//!
//! A tag is a lowercase token of at least two characters that is neither a
//! bare `-`/`_` nor a stop word. Punctuation other than hyphen and underscore
//! is treated as whitespace, so `"Bank's of France"` tokenizes to
//! `["bank", "france"]`.

use std::collections::HashSet;

/// Minimum character length for a tag.
pub const MIN_TAG_CHARS: usize = 2;

/// Default English stop-word list (NLTK corpus) plus nothing else; callers
/// extend it through [`Tokenizer::with_extra_stop_words`].
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now", "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren",
    "couldn", "didn", "doesn", "hadn", "hasn", "haven", "isn", "ma", "mightn", "mustn",
    "needn", "shan", "shouldn", "wasn", "weren", "won", "wouldn",
];

/// Stateless text-to-tag normalizer with a configurable stop-word set.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl Tokenizer {
    /// Default stop words extended with `extra` (compared after lowercasing).
    pub fn with_extra_stop_words(extra: &[String]) -> Self {
        let mut tokenizer = Self::default();
        tokenizer
            .stop_words
            .extend(extra.iter().map(|w| w.trim().to_lowercase()));
        tokenizer
    }

    /// Normalize `text` into an ordered sequence of tags. Pure and stable:
    /// identical input always yields identical output. Consumers that union
    /// tags from several fragments re-sort afterward.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let lowered = text.trim().to_lowercase();
        let separated: String = lowered
            .chars()
            .map(|c| {
                if c.is_ascii_punctuation() && c != '-' && c != '_' {
                    ' '
                } else {
                    c
                }
            })
            .collect();

        separated
            .split_whitespace()
            .filter(|token| self.keep(token))
            .map(|token| token.to_string())
            .collect()
    }

    fn keep(&self, token: &str) -> bool {
        if token.chars().count() < MIN_TAG_CHARS {
            return false;
        }
        if token == "-" || token == "_" {
            return false;
        }
        !self.stop_words.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_stop_words() {
        let tokenizer = Tokenizer::default();
        assert_eq!(tokenizer.tokenize("Bank's of France"), vec!["bank", "france"]);
        assert_eq!(
            tokenizer.tokenize("Bank's of & France"),
            vec!["bank", "france"]
        );
        assert_eq!(tokenizer.tokenize("France"), vec!["france"]);
        assert_eq!(tokenizer.tokenize("Bank's"), vec!["bank"]);
    }

    #[test]
    fn test_empty_input() {
        let tokenizer = Tokenizer::default();
        assert!(tokenizer.tokenize("").is_empty());
        assert!(tokenizer.tokenize("   ").is_empty());
    }

    #[test]
    fn test_stop_words_and_short_tokens_dropped() {
        let tokenizer = Tokenizer::default();
        assert_eq!(
            tokenizer.tokenize("The a France Quaterly"),
            vec!["france", "quaterly"]
        );
        // Single characters and bare separators never survive
        assert!(tokenizer.tokenize("a - _ x 1").is_empty());
    }

    #[test]
    fn test_hyphen_and_underscore_preserved() {
        let tokenizer = Tokenizer::default();
        assert_eq!(
            tokenizer.tokenize("OBS_STATUS seasonally-adjusted"),
            vec!["obs_status", "seasonally-adjusted"]
        );
    }

    #[test]
    fn test_extra_stop_words() {
        let tokenizer = Tokenizer::with_extra_stop_words(&["france".to_string()]);
        assert_eq!(tokenizer.tokenize("Bank's of France"), vec!["bank"]);
    }

    #[test]
    fn test_deterministic() {
        let tokenizer = Tokenizer::default();
        let a = tokenizer.tokenize("Monthly unemployment rate, France");
        let b = tokenizer.tokenize("Monthly unemployment rate, France");
        assert_eq!(a, b);
    }
}
