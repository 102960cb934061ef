//! Character-based text splitting with overlap.
//!
//! Table metadata is usually short, but long schema dumps are cut into
//! windows so each embedded chunk stays focused. Lengths are counted in
//! chars, never bytes.

/// Chunk size used for table metadata.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Separators tried, in order, when looking for a cut point.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Split `text` into trimmed chunks of at most `chunk_size` chars.
///
/// A window is cut at the last separator in its second half when one
/// exists, otherwise at the hard limit. The next window starts `overlap`
/// chars before the cut. Blank chunks are dropped.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_cut(&chars, start + chunk_size / 2, hard_end).unwrap_or(hard_end)
        };

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end == chars.len() {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Position just after the last separator found in `chars[from..to]`.
fn find_cut(chars: &[char], from: usize, to: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|sep| {
        let sep: Vec<char> = sep.chars().collect();
        let last = to.checked_sub(sep.len())?;
        (from..=last)
            .rev()
            .find(|&i| chars[i..i + sep.len()] == sep[..])
            .map(|i| i + sep.len())
    })
}
