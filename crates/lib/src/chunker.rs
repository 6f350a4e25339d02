//! Fixed-size text windows with overlap, measured in characters.

/// Default characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default overlapping characters between adjacent chunks.
pub const DEFAULT_OVERLAP: usize = 128;

/// A text window taken from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub document_id: String,
}

/// Splits text into `chunk_size`-character windows that overlap by
/// `overlap` characters.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Produces dense 0-indexed chunks covering `text`. Empty text yields an
    /// empty vec; the final chunk may be shorter than `chunk_size`.
    ///
    /// `chunk_size` falls back to the default when zero; `overlap` is
    /// clamped to `[0, chunk_size - 1]`.
    pub fn split(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let chunk_size = if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        };
        let overlap = self.overlap.min(chunk_size - 1);
        let step = chunk_size - overlap;

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut index = 0usize;
        let mut start = 0usize;

        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            chunks.push(Chunk {
                text: chars[start..end].iter().collect(),
                index,
                document_id: document_id.to_string(),
            });
            index += 1;
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
