//! Recursive character chunker.
//!
//! Splits sanitized text into overlapping windows that respect a target
//! `size` and `overlap`, preferring to break on structural separators in
//! order: paragraph break, line break, sentence end, word boundary, and
//! finally a hard character split. Separators are retained in the output, so
//! every chunk is a verbatim contiguous slice of the input and newline
//! structure survives.
//!
//! Each chunk carries a 1-based inclusive line range. The range is computed
//! by locating the chunk's first occurrence in the input text, so duplicated
//! passages resolve to the lines of the first copy.

use tracing::warn;

/// Separator preference list, most structural first. The empty string is
/// the hard-split fallback.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// A contiguous window of characters from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// 1-based first line of the chunk within the chunked text.
    pub start_line: usize,
    /// 1-based last line, inclusive.
    pub end_line: usize,
}

/// Split `text` into chunks of roughly `size` characters overlapping by
/// `overlap`, annotated with line ranges.
///
/// Windows that are empty after trimming, contain NUL, or blew past `2 * size`
/// (a splitter failure) are dropped with a warning.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = split_recursive(text, size, &SEPARATORS);
    let windows = merge_pieces(pieces, size, overlap);

    let mut chunks = Vec::with_capacity(windows.len());
    for window in windows {
        if window.trim().is_empty() {
            continue;
        }
        if window.contains('\0') {
            warn!(len = window.len(), "dropping chunk containing NUL byte");
            continue;
        }
        if window.chars().count() > 2 * size {
            warn!(
                len = window.len(),
                limit = 2 * size,
                "dropping oversized chunk; splitter failed to break it down"
            );
            continue;
        }
        let (start_line, end_line) = locate_lines(text, &window);
        chunks.push(Chunk {
            content: window,
            start_line,
            end_line,
        });
    }
    chunks
}

/// Recursively split text into pieces no larger than `size`, trying each
/// separator in preference order. Separators stay attached to the piece
/// they terminate.
fn split_recursive(text: &str, size: usize, separators: &[&str]) -> Vec<String> {
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }

    let (sep, rest) = match separators.split_first() {
        Some((s, r)) => (*s, r),
        None => return vec![text.to_string()],
    };

    if sep.is_empty() {
        return hard_split(text, size);
    }
    if !text.contains(sep) {
        return split_recursive(text, size, rest);
    }

    let mut pieces = Vec::new();
    for piece in split_keep_separator(text, sep) {
        if piece.chars().count() <= size {
            pieces.push(piece);
        } else {
            pieces.extend(split_recursive(&piece, size, rest));
        }
    }
    pieces
}

/// Split on `sep`, keeping the separator at the end of each piece so that
/// concatenating the pieces reproduces the input exactly.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(sep) {
        let cut = idx + sep.len();
        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Last-resort split into fixed-size character windows.
fn hard_split(text: &str, size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::with_capacity(size);
    let mut count = 0;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == size {
            pieces.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Greedily merge pieces into windows up to `size` characters. When a window
/// flushes, a tail of at most `overlap` characters carries into the next
/// window so adjacent chunks share context.
fn merge_pieces(pieces: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();
        if total + piece_len > size && !current.is_empty() {
            windows.push(current.concat());
            // Drop leading pieces until the retained tail is within the
            // overlap and leaves room for the incoming piece.
            while total > overlap || (total + piece_len > size && total > 0) {
                let dropped = current.remove(0);
                total -= dropped.chars().count();
            }
        }
        total += piece_len;
        current.push(piece);
    }
    if !current.is_empty() {
        windows.push(current.concat());
    }
    windows
}

/// 1-based inclusive line range of the first occurrence of `window` in
/// `text`. Chunks are verbatim slices, so the search cannot fail; the
/// degenerate fallback is line 1.
fn locate_lines(text: &str, window: &str) -> (usize, usize) {
    let offset = text.find(window).unwrap_or(0);
    let start_line = 1 + text[..offset].matches('\n').count();
    let end_line = start_line + window.trim_end_matches('\n').matches('\n').count();
    (start_line, end_line)
}
