//! Embedding providers.
//!
//! An [`Embedder`] maps text to a fixed-length vector. The same model always
//! produces vectors of the same dimension, and the same vector for the same
//! input. Two backends exist:
//!
//! - [`MiniLmEmbedder`]: a sentence-transformers BERT model run locally with
//!   candle (feature `local-embeddings`).
//! - [`HashEmbedder`]: deterministic feature hashing of word tokens. No model
//!   download; useful offline and in tests.

mod hash;
#[cfg(feature = "local-embeddings")]
mod minilm;

pub use hash::HashEmbedder;
#[cfg(feature = "local-embeddings")]
pub use minilm::MiniLmEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{GraderError, Result};

/// Text to vector mapping used by the index and the retriever.
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded alongside persisted indexes.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| GraderError::Embedding("empty embedding batch".to_string()))
    }
}

/// Instantiate the embedder selected by the config.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(Box::new(HashEmbedder::new(config.hash_dimension)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Box::new(MiniLmEmbedder::load(&config.model_id)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(GraderError::Embedding(
            "local embeddings require building with --features local-embeddings".to_string(),
        )),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for vectors of different lengths or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
