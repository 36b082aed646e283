//! Utility functions for string handling, fingerprints and file system checks.
//!
//! - String truncation for log previews
//! - Filename slugs derived from translated titles
//! - URL fingerprints used as cache keys
//! - URL list parsing and output directory validation

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{info, instrument};

static FORBIDDEN_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Longest filename stem, in characters.
const MAX_SLUG_CHARS: usize = 120;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (backing off to a character
/// boundary) with an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// SHA-256 hex digest of a URL; the cache key for that URL.
pub fn fingerprint(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Turn a (translated) title into a safe filename stem.
///
/// Characters that are illegal on common file systems are removed, spaces
/// become underscores and the result is capped at 120 characters. Titles
/// that sanitize to nothing fall back to a short fingerprint of `fallback_key`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(safe_filename("Hello: World?", "u"), "Hello_World");
/// ```
pub fn safe_filename(title: &str, fallback_key: &str) -> String {
    let cleaned = FORBIDDEN_FILENAME_CHARS.replace_all(title, "");
    let slug: String = cleaned
        .trim()
        .split_whitespace()
        .join("_")
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect();
    let slug = slug.trim_matches('.').to_string();
    if slug.is_empty() {
        fingerprint(fallback_key)[..10].to_string()
    } else {
        slug
    }
}

/// Parse a newline-delimited URL list.
///
/// Blank lines and `#` comments are skipped; duplicates keep their first position.
pub fn parse_url_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .unique()
        .map(str::to_string)
        .collect()
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn ensure_writable_dir(path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let path = path.as_ref();
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Write `contents` to `path` via a sibling temp file and a rename, so readers
/// never observe a half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "长城长城";
        // each char is 3 bytes; 4 bytes must back off to 3
        assert_eq!(truncate_for_log(s, 4), "长…(+9 bytes)");
    }

    #[test]
    fn test_fingerprint_is_stable_sha256() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(fingerprint("https://a"), fingerprint("https://b"));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Hello: World?", "u"), "Hello_World");
        assert_eq!(safe_filename("  a/b\\c  d ", "u"), "abc_d");
        assert_eq!(safe_filename("长城 旅游 指南", "u"), "长城_旅游_指南");
        assert_eq!(safe_filename(&"x".repeat(300), "u").chars().count(), 120);
    }

    #[test]
    fn test_safe_filename_falls_back_to_fingerprint() {
        let slug = safe_filename(" ?? ", "https://example.com/a");
        assert_eq!(slug, fingerprint("https://example.com/a")[..10]);
    }

    #[test]
    fn test_parse_url_list() {
        let raw = "https://a.com/1\n\n  https://b.com/2  \n# comment\nhttps://a.com/1\n";
        assert_eq!(
            parse_url_list(raw),
            vec!["https://a.com/1".to_string(), "https://b.com/2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("page.html");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        ensure_writable_dir(&target).await.unwrap();
        assert!(target.is_dir());
    }
}
