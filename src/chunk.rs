//! Overlapping text chunking.
//!
//! Text is split into windows of at most `chunk_size` characters. A chunk
//! ends on the last line boundary that fits in its window. A single line
//! longer than the window is cut at the window edge by default; with
//! [`LongLines::Keep`] it is emitted whole as one oversized chunk instead.
//! Either way no text is dropped. Each chunk after the first starts
//! `chunk_overlap` characters before the end of the previous one.
//!
//! Chunks are exact substrings of the input, described by character
//! offsets, which makes the overlap structure easy to reason about:
//! the first chunk followed by every later chunk's text past the previous
//! chunk's end reproduces the input.

use crate::config::{ChunkConfig, LongLines};
use crate::document::Document;
use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};

/// A chunk of text with its position in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text content.
    pub text: String,
    /// Start character position in original text.
    pub start: usize,
    /// End character position in original text (exclusive).
    pub end: usize,
    /// Chunk index.
    pub index: usize,
}

impl Chunk {
    /// Convert into an indexable document.
    pub fn into_document(self, source: Option<&str>) -> Document {
        let doc = Document::new(self.text).with_chunk_index(self.index);
        match source {
            Some(source) => doc.with_source(source),
            None => doc,
        }
    }
}

/// Newline-preferring splitter with fixed overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    long_lines: LongLines,
}

impl Chunker {
    /// Create a chunker. The overlap must be smaller than the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(GraderError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(GraderError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            long_lines: LongLines::default(),
        })
    }

    /// Create from a chunking config.
    pub fn from_config(config: &ChunkConfig) -> Result<Self> {
        Ok(Self::new(config.chunk_size, config.chunk_overlap)?.with_long_lines(config.long_lines))
    }

    /// Set how lines longer than the chunk size are handled.
    pub fn with_long_lines(mut self, long_lines: LongLines) -> Self {
        self.long_lines = long_lines;
        self
    }

    /// Split text into overlapping chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let text_len = chars.len();
        let mut chunks = Vec::new();

        if text_len == 0 {
            return chunks;
        }

        // Positions right after each newline, plus the end of the text.
        let mut boundaries: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == '\n')
            .map(|(i, _)| i + 1)
            .collect();
        if boundaries.last() != Some(&text_len) {
            boundaries.push(text_len);
        }

        let mut start = 0;
        let mut prev_end = 0;

        loop {
            let limit = (start + self.chunk_size).min(text_len);

            // Last boundary inside the window that also moves past the previous chunk.
            let fit = boundaries.partition_point(|&b| b <= limit);
            let end = match fit.checked_sub(1).map(|i| boundaries[i]) {
                Some(b) if b > prev_end => b,
                _ => match self.long_lines {
                    LongLines::Split => limit,
                    LongLines::Keep => boundaries.get(fit).copied().unwrap_or(limit),
                },
            };

            chunks.push(Chunk {
                text: chars[start..end].iter().collect(),
                start,
                end,
                index: chunks.len(),
            });

            if end >= text_len {
                break;
            }

            start = end.saturating_sub(self.chunk_overlap).max(start);
            prev_end = end;
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        let config = ChunkConfig::default();
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            long_lines: config.long_lines,
        }
    }
}
