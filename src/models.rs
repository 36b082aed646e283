//! Data models passed between pipeline stages.
//!
//! - [`FetchResult`]: raw markup for one URL, dropped once extraction is done
//! - [`ExtractedArticle`]: normalized title and paragraph text
//! - [`CacheEntry`]: the record persisted for every processed URL

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between paragraphs in extracted and translated text.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Raw markup as returned by the fetcher. Never empty.
#[derive(Debug)]
pub struct FetchResult {
    pub url: String,
    pub body: String,
}

/// Which extraction strategy produced an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Readability,
    DensityScoring,
    DomainSelector,
    GenericSelector,
    LargestBlock,
    Body,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Readability => "readability",
            Strategy::DensityScoring => "density-scoring",
            Strategy::DomainSelector => "domain-selector",
            Strategy::GenericSelector => "generic-selector",
            Strategy::LargestBlock => "largest-block",
            Strategy::Body => "body",
        };
        f.write_str(name)
    }
}

/// A readable article recovered from a page.
///
/// `text` holds plain paragraphs joined by [`PARAGRAPH_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub url: String,
    pub title: String,
    pub text: String,
    /// `og:image` resolved against the page URL, when the page declares one.
    pub lead_image: Option<String>,
    pub strategy: Strategy,
}

impl ExtractedArticle {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.text
            .split(PARAGRAPH_SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Marker that a URL has already been turned into a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    /// Translated title, which is also the output file's stem.
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(text: &str) -> ExtractedArticle {
        ExtractedArticle {
            url: "https://example.com/a".to_string(),
            title: "Hello".to_string(),
            text: text.to_string(),
            lead_image: None,
            strategy: Strategy::GenericSelector,
        }
    }

    #[test]
    fn test_char_count_counts_chars_not_bytes() {
        assert_eq!(article("长城").char_count(), 2);
    }

    #[test]
    fn test_paragraphs_skip_blank_entries() {
        let a = article("One.\n\n\n\n  Two.  \n\nThree.");
        assert_eq!(a.paragraphs().collect::<Vec<_>>(), vec!["One.", "Two.", "Three."]);
    }

    #[test]
    fn test_cache_entry_serialization() {
        let entry = CacheEntry::new("https://example.com/a", "你好");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"title\":\"你好\""));
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::DensityScoring.to_string(), "density-scoring");
        assert_eq!(
            serde_json::to_string(&Strategy::LargestBlock).unwrap(),
            "\"largest_block\""
        );
    }
}
