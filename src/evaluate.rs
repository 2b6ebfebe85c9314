//! End-to-end evaluation of one submission.
//!
//! extract → chunk → build index → persist → reload → retrieve → grade.
//!
//! Stages run strictly in sequence and the first failure aborts the
//! submission; nothing partial is ever returned. Each evaluation persists its
//! index under a directory derived from the submission key, so concurrent
//! evaluations must use distinct keys.

use crate::chunk::Chunker;
use crate::config::Config;
use crate::document::Document;
use crate::embedding::Embedder;
use crate::error::{GraderError, Result};
use crate::extract;
use crate::grader::{EvaluationResult, StructuredGrader};
use crate::index::VectorIndex;
use crate::llm::{ChatBackend, LlmClient};
use crate::persistence::IndexStore;
use crate::retrieval::Retriever;
use std::path::{Path, PathBuf};
use tracing::Instrument;

/// Runs the full grading pipeline for individual submissions.
pub struct Evaluator<B> {
    chunker: Chunker,
    embedder: Box<dyn Embedder>,
    store: IndexStore,
    retriever: Retriever,
    grader: StructuredGrader<B>,
}

impl Evaluator<LlmClient> {
    /// Build an evaluator talking to the configured LLM endpoint.
    ///
    /// Fails if the configuration is incomplete (e.g. no API key).
    pub fn from_config(config: &Config, embedder: Box<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let client = LlmClient::new(config.llm.clone())?;
        Self::new(config, embedder, client)
    }
}

impl<B: ChatBackend> Evaluator<B> {
    /// Build an evaluator around any chat backend.
    pub fn new(config: &Config, embedder: Box<dyn Embedder>, backend: B) -> Result<Self> {
        config.validate_pipeline()?;
        Ok(Self {
            chunker: Chunker::from_config(&config.chunking)?,
            embedder,
            store: IndexStore::new(config.index.root_dir.clone()),
            retriever: Retriever::new(config.retrieval.top_k),
            grader: StructuredGrader::with_config(backend, &config.grading),
        })
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn grader(&self) -> &StructuredGrader<B> {
        &self.grader
    }

    /// Extract, chunk, embed and persist a submission's index.
    ///
    /// Returns the location the index was written to.
    pub fn build_index<P: AsRef<Path>>(&self, submission_key: &str, paths: &[P]) -> Result<PathBuf> {
        let location = self.store.location(submission_key)?;
        let extracted = extract::extract_files(paths)?;
        tracing::info!(
            "Extracted {} chars from {} file(s)",
            extracted.text.chars().count(),
            extracted.spans.len()
        );

        if extracted.text.trim().is_empty() {
            return Err(GraderError::IndexBuild(
                "submission contains no extractable text".to_string(),
            ));
        }

        // A chunk straddling two files is attributed to the one it starts in.
        let documents: Vec<Document> = self
            .chunker
            .split(&extracted.text)
            .into_iter()
            .map(|chunk| {
                let source = extracted.source_at(chunk.start);
                chunk.into_document(source)
            })
            .collect();
        tracing::info!("Split into {} chunks", documents.len());

        let index = VectorIndex::build(documents, self.embedder.as_ref())?;
        index.persist(&location)?;
        tracing::info!("Persisted index to {}", location.display());

        Ok(location)
    }

    /// Grade one submission against an assignment prompt.
    pub async fn evaluate<P: AsRef<Path>>(
        &self,
        submission_key: &str,
        assignment: &str,
        paths: &[P],
    ) -> Result<EvaluationResult> {
        let span = tracing::info_span!("evaluate", submission = submission_key);
        async {
            let location = self.build_index(submission_key, paths)?;

            let index = VectorIndex::load(&location, self.embedder.as_ref())?;
            let excerpts = self
                .retriever
                .excerpts(assignment, &index, self.embedder.as_ref())?;
            tracing::info!(
                "Retrieved {} excerpt chars (top {})",
                excerpts.chars().count(),
                self.retriever.top_k()
            );

            self.grader.grade(assignment, &excerpts).await
        }
        .instrument(span)
        .await
    }
}
