//! Excerpt retrieval for the grader.

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;

/// Separator placed between excerpts handed to the model.
pub const EXCERPT_SEPARATOR: &str = "\n\n------------------------------------------------------\n\n";

/// Default number of excerpts.
pub const DEFAULT_TOP_K: usize = 3;

/// Pulls the chunks most similar to an assignment prompt out of an index.
#[derive(Debug, Clone)]
pub struct Retriever {
    top_k: usize,
}

impl Retriever {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Nearest chunks to `prompt`, joined with [`EXCERPT_SEPARATOR`], nearest first.
    ///
    /// An empty index yields an empty string.
    pub fn excerpts(&self, prompt: &str, index: &VectorIndex, embedder: &dyn Embedder) -> Result<String> {
        if index.is_empty() {
            return Ok(String::new());
        }

        let results = index.query(prompt, embedder, self.top_k)?;
        for (rank, result) in results.iter().enumerate() {
            tracing::debug!(
                "Excerpt {} (chunk {:?}) similarity {:.3}",
                rank + 1,
                result.document.chunk_index,
                result.similarity()
            );
        }

        Ok(results
            .iter()
            .map(|r| r.document.content.as_str())
            .collect::<Vec<_>>()
            .join(EXCERPT_SEPARATOR))
    }
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}
