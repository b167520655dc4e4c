//! Offset helpers for UTF-8 content.
//!
//! Editor offsets are byte offsets into the document. These helpers keep
//! them on char boundaries and cut bounded context windows by char count.

/// Largest char boundary `<= offset`, clamped to `s.len()`.
pub fn floor_boundary(s: &str, offset: usize) -> usize {
    if offset >= s.len() {
        return s.len();
    }
    let mut i = offset;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Number of chars (not bytes) in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Up to `max_chars` chars ending at byte offset `end`.
pub fn tail_chars(s: &str, end: usize, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let end = floor_boundary(s, end);
    let head = &s[..end];
    match head.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &head[start..],
        None => head,
    }
}

/// Up to `max_chars` chars starting at byte offset `start`.
pub fn head_chars(s: &str, start: usize, max_chars: usize) -> &str {
    let start = floor_boundary(s, start);
    let rest = &s[start..];
    match rest.char_indices().nth(max_chars) {
        Some((end, _)) => &rest[..end],
        None => rest,
    }
}

/// True when `text` is empty or whitespace only.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
