//! RAG Grader - retrieval-augmented grading of student PDF submissions.
//!
//! A submission is extracted to text, split into overlapping chunks, embedded
//! into a vector index persisted per submission, and queried with the
//! assignment prompt. The most relevant excerpts go to an LLM that must answer
//! with a schema-conforming evaluation (grade, remarks, strengths, areas for
//! improvement), validated locally and retried on violation.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_grader::{config::Config, embedding::create_embedder, evaluate::Evaluator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let embedder = create_embedder(&config.embedding)?;
//!     let evaluator = Evaluator::from_config(&config, embedder)?;
//!
//!     let result = evaluator
//!         .evaluate("hw1/alice", "Implement bubble sort", &["alice.pdf"])
//!         .await?;
//!
//!     println!("{}: {}", result.grade, result.remarks);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **extract**: PDF text extraction
//! - **chunk**: Overlapping, boundary-aware text splitting
//! - **embedding**: Sentence embedders (MiniLM via candle, or a hashing fallback)
//! - **index** / **persistence**: Vector index and its on-disk form
//! - **retrieval**: Top-k excerpt assembly
//! - **grader**: Schema-constrained LLM grading with retries
//! - **evaluate**: The end-to-end pipeline for one submission
//! - **batch**: Grading every submission of an assignment

pub mod batch;
pub mod chunk;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod grader;
pub mod index;
pub mod llm;
pub mod persistence;
pub mod retrieval;

pub use batch::{BatchReport, Manifest, run_batch};
pub use chunk::{Chunk, Chunker};
pub use config::Config;
pub use document::Document;
pub use embedding::{Embedder, HashEmbedder, create_embedder};
pub use error::{GraderError, Result, Stage};
pub use evaluate::Evaluator;
pub use grader::{EvaluationResult, StructuredGrader};
pub use index::VectorIndex;
pub use llm::{ChatBackend, LlmClient};
pub use persistence::IndexStore;
pub use retrieval::Retriever;
