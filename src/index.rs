//! Per-submission vector index.
//!
//! Holds (embedding, document) pairs and answers nearest-neighbour queries by
//! cosine distance. Indexes are built in one go and never updated in place;
//! rebuilding for the same location replaces the previous one.
//!
//! Loading an index and querying it with an embedder of a different model or
//! dimension yields meaningless neighbours. Keeping the embedder consistent is
//! the caller's job; [`VectorIndex::load`] only logs a warning on mismatch.

use crate::document::Document;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::{GraderError, Result};
use crate::persistence;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Documents embedded per batch while building.
const EMBED_BATCH_SIZE: usize = 32;

/// A vector index entry.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub document: Document,
}

/// A document returned by a query with its distance to the query.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    /// Cosine distance, `1 - cosine_similarity`; smaller is nearer.
    pub distance: f32,
}

impl ScoredDocument {
    /// Cosine similarity to the query.
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Vector search index for one submission.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct VectorIndex {
    model_name: String,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed every document and store the pairs in insertion order.
    pub fn build(documents: Vec<Document>, embedder: &dyn Embedder) -> Result<Self> {
        if documents.is_empty() {
            return Err(GraderError::IndexBuild(
                "cannot build an index from zero documents".to_string(),
            ));
        }

        let dimension = embedder.dimension();
        let mut entries = Vec::with_capacity(documents.len());

        for batch in documents.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|d| d.content.as_str()).collect();
            let embeddings = embedder.embed_batch(&texts)?;

            if embeddings.len() != batch.len() {
                return Err(GraderError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for (document, embedding) in batch.iter().zip(embeddings) {
                if embedding.len() != dimension {
                    return Err(GraderError::Embedding(format!(
                        "expected {}-dimensional vector, got {}",
                        dimension,
                        embedding.len()
                    )));
                }
                entries.push(IndexEntry {
                    embedding,
                    document: document.clone(),
                });
            }
        }

        tracing::debug!(
            "Built index of {} documents with {} ({} dims)",
            entries.len(),
            embedder.model_name(),
            dimension
        );

        Ok(Self {
            model_name: embedder.model_name().to_string(),
            dimension,
            entries,
        })
    }

    /// Write the index to `location`, replacing any index already there.
    pub fn persist(&self, location: &Path) -> Result<()> {
        persistence::save_index(self, location)
    }

    /// Read an index previously written with [`VectorIndex::persist`].
    pub fn load(location: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let index = persistence::load_index(location)?;

        if index.dimension != embedder.dimension() || index.model_name != embedder.model_name() {
            tracing::warn!(
                "Index at {} was built with {} ({} dims) but is loaded with {} ({} dims)",
                location.display(),
                index.model_name,
                index.dimension,
                embedder.model_name(),
                embedder.dimension()
            );
        }

        Ok(index)
    }

    /// Return the `k` documents nearest to `text`, nearest first.
    ///
    /// Equal distances keep insertion order. Fewer than `k` entries returns all.
    pub fn query(&self, text: &str, embedder: &dyn Embedder, k: usize) -> Result<Vec<ScoredDocument>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = embedder.embed(text)?;
        Ok(self.nearest(&query_embedding, k))
    }

    /// Nearest-neighbour search with an already embedded query.
    pub fn nearest(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredDocument> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, 1.0 - cosine_similarity(query_embedding, &entry.embedding)))
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, distance)| ScoredDocument {
                document: self.entries[i].document.clone(),
                distance,
            })
            .collect()
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the model the index was built with.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Vector dimension of every entry.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get all entries.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}
