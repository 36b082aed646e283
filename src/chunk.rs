//! Paragraph-bounded chunking.
//!
//! Translation backends take text in bounded pieces. [`chunk`] packs whole
//! paragraphs greedily; a paragraph is never split, so one longer than the
//! limit becomes a chunk of its own. Sizes are counted in characters, with
//! the separators between packed paragraphs included.

use crate::models::PARAGRAPH_SEPARATOR;

/// Split `text` into chunks of at most `max_size` characters where possible.
///
/// Empty input yields no chunks. Joining the result with
/// [`PARAGRAPH_SEPARATOR`] reproduces `text` exactly.
pub fn chunk(text: &str, max_size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let sep_len = PARAGRAPH_SEPARATOR.chars().count();
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;
    let mut current_has_text = false;

    for para in text.split(PARAGRAPH_SEPARATOR) {
        let para_size = para.chars().count();
        let grown = if current.is_empty() {
            para_size
        } else {
            current_size + sep_len + para_size
        };

        // empty paragraphs ride along with their neighbours so no chunk is blank
        if grown > max_size && current_has_text && !para.is_empty() {
            chunks.push(current.join(PARAGRAPH_SEPARATOR));
            current = vec![para];
            current_size = para_size;
        } else {
            current.push(para);
            current_size = grown;
        }
        current_has_text |= !para.is_empty();
    }

    if !current.is_empty() {
        chunks.push(current.join(PARAGRAPH_SEPARATOR));
    }
    chunks
}

/// Inverse of [`chunk`].
pub fn rejoin<S: AsRef<str>>(chunks: &[S]) -> String {
    chunks
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR)
}
