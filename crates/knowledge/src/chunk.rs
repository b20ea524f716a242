//! Fixed-window text chunker with overlap.
//!
//! Splits text into windows of at most `size` bytes, each starting
//! `size - overlap` bytes after the previous one. Window edges are moved
//! back to the nearest UTF-8 character boundary, so multi-byte text never
//! splits inside a character.

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// `size` is clamped to at least 1 and `overlap` to below `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping slices.
    ///
    /// Text no longer than `size` comes back as a single slice (including the
    /// empty string).
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.len() <= self.size {
            return vec![text];
        }

        let step = self.size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let mut end = snap_to_char_boundary(text, start + self.size);
            if end <= start {
                end = next_char_boundary(text, start);
            }
            chunks.push(&text[start..end]);
            if end == text.len() {
                break;
            }

            let mut next = snap_to_char_boundary(text, start + step);
            if next <= start {
                next = next_char_boundary(text, start);
            }
            start = next;
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// The first char boundary strictly after `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}
