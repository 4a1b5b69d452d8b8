//! Item classification for the id scan

use crate::client::Item;
use crate::ConfigError;
use regex::Regex;

/// Decides whether an item's content is relevant
pub trait ItemPredicate: Send + Sync {
    fn matches(&self, item: &Item) -> bool;
}

/// Case-insensitive whole-word match of any keyword against the title
#[derive(Debug, Clone)]
pub struct KeywordPredicate {
    pattern: Regex,
}

impl KeywordPredicate {
    /// Compiles the keyword list into one alternation
    ///
    /// # Examples
    ///
    /// ```
    /// use tidepool::crawler::KeywordPredicate;
    ///
    /// let predicate = KeywordPredicate::new(&["rust".to_string(), "open source".to_string()]).unwrap();
    /// assert!(predicate.is_match("Show HN: An Open Source tool written in Rust"));
    /// assert!(!predicate.is_match("Trust me"));
    /// ```
    pub fn new(keywords: &[String]) -> Result<Self, ConfigError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Err(ConfigError::InvalidKeyword(
                "no keywords to match".to_string(),
            ));
        }

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|e| ConfigError::InvalidKeyword(e.to_string()))?;

        Ok(Self { pattern })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

impl ItemPredicate for KeywordPredicate {
    fn matches(&self, item: &Item) -> bool {
        item.title().map_or(false, |title| self.is_match(title))
    }
}

/// Score threshold plus content predicate
pub struct ScanFilter {
    pub min_score: i64,
    pub predicate: Box<dyn ItemPredicate>,
}

impl ScanFilter {
    pub fn new(min_score: i64, predicate: impl ItemPredicate + 'static) -> Self {
        Self {
            min_score,
            predicate: Box::new(predicate),
        }
    }
}

impl std::fmt::Debug for ScanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanFilter")
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let predicate = KeywordPredicate::new(&keywords(&["go", "rust"])).unwrap();
        assert!(predicate.is_match("Why I moved to Go"));
        assert!(predicate.is_match("GO is fast"));
        assert!(!predicate.is_match("Google announces"));
        assert!(predicate.is_match("Rust's borrow checker"));
        assert!(!predicate.is_match("Trusting trust"));
    }

    #[test]
    fn test_multi_word_keyword() {
        let predicate = KeywordPredicate::new(&keywords(&["open source"])).unwrap();
        assert!(predicate.is_match("The state of open source funding"));
        assert!(!predicate.is_match("open-source"));
    }

    #[test]
    fn test_empty_keywords_rejected() {
        assert!(KeywordPredicate::new(&[]).is_err());
        assert!(KeywordPredicate::new(&keywords(&["  "])).is_err());
    }
}
