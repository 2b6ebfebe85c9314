//! Retrievable text units.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A unit of retrievable text, produced by the chunker and stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Document {
    /// Text content.
    pub content: String,
    /// Identifier of the file or submission the text came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Position of the chunk within its source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
            chunk_index: None,
        }
    }

    /// Attach a source identifier.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the chunk position.
    pub fn with_chunk_index(mut self, index: usize) -> Self {
        self.chunk_index = Some(index);
        self
    }

    /// Character count of the content.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}
