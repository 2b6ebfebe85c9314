//! Configuration for the grader.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the OpenAI-compatible API (e.g., "https://api.groq.com/openai")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name (e.g., "llama-3.1-8b-instant")
    pub model: String,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.groq.com/openai".to_string(),
            api_key: String::new(),
            model: "llama-3.1-8b-instant".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Which embedding implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Sentence-transformers model run locally with candle.
    Local,
    /// Deterministic feature hashing, no model download.
    Hash,
}

impl EmbeddingBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(EmbeddingBackend::Local),
            "hash" => Some(EmbeddingBackend::Hash),
            _ => None,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Hugging Face model id for the local backend.
    pub model_id: String,
    /// Vector size for the hash backend.
    pub hash_dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            hash_dimension: 384,
        }
    }
}

/// Configuration for text chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// What to do with a line longer than `chunk_size`.
    #[serde(default)]
    pub long_lines: LongLines,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            long_lines: LongLines::default(),
        }
    }
}

/// Handling of a single line that does not fit in one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongLines {
    /// Cut the line at the window edge; every chunk respects `chunk_size`.
    #[default]
    Split,
    /// Emit the whole line as one oversized chunk.
    Keep,
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of excerpts handed to the grader.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// How the expected output shape is declared to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredOutput {
    /// `response_format: json_schema` with the full evaluation schema.
    JsonSchema,
    /// `response_format: json_object`, for endpoints without schema support.
    JsonObject,
}

/// Structured grading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Total requests allowed per submission, first attempt included.
    pub max_attempts: usize,
    /// Base delay before repeating a request after a transport failure.
    pub retry_backoff_ms: u64,
    pub structured_output: StructuredOutput,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 500,
            structured_output: StructuredOutput::JsonObject,
        }
    }
}

/// Where per-submission indexes are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub root_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data/indexes"),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingFileSection>,
    chunking: Option<ChunkingFileSection>,
    retrieval: Option<RetrievalFileSection>,
    grading: Option<GradingFileSection>,
    index: Option<IndexFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingFileSection {
    backend: Option<EmbeddingBackend>,
    model_id: Option<String>,
    hash_dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ChunkingFileSection {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    long_lines: Option<LongLines>,
}

#[derive(Debug, Deserialize)]
struct RetrievalFileSection {
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GradingFileSection {
    max_attempts: Option<usize>,
    retry_backoff_ms: Option<u64>,
    structured_output: Option<StructuredOutput>,
}

#[derive(Debug, Deserialize)]
struct IndexFileSection {
    root_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY or GROQ_API_KEY, LLM_MODEL, ...)
    /// 2. Config file (~/.config/rag-grader/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY").or_else(|_| env::var("GROQ_API_KEY")) {
            self.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(tokens) = parse_env("LLM_MAX_TOKENS") {
            self.llm.max_tokens = tokens;
        }

        if let Some(temp) = parse_env("LLM_TEMPERATURE") {
            self.llm.temperature = temp;
        }

        if let Some(secs) = parse_env("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = secs;
        }

        if let Ok(backend) = env::var("GRADER_EMBEDDING_BACKEND") {
            match EmbeddingBackend::parse(&backend) {
                Some(b) => self.embedding.backend = b,
                None => tracing::warn!("Ignoring unknown GRADER_EMBEDDING_BACKEND '{}'", backend),
            }
        }

        if let Ok(model_id) = env::var("GRADER_EMBEDDING_MODEL") {
            self.embedding.model_id = model_id;
        }

        if let Ok(dir) = env::var("GRADER_INDEX_DIR") {
            self.index.root_dir = PathBuf::from(dir);
        }

        if let Some(attempts) = parse_env("GRADER_MAX_ATTEMPTS") {
            self.grading.max_attempts = attempts;
        }

        if let Some(top_k) = parse_env("GRADER_TOP_K") {
            self.retrieval.top_k = top_k;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| GraderError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(embedding) = file_config.embedding {
            if let Some(backend) = embedding.backend {
                config.embedding.backend = backend;
            }
            if let Some(model_id) = embedding.model_id {
                config.embedding.model_id = model_id;
            }
            if let Some(dim) = embedding.hash_dimension {
                config.embedding.hash_dimension = dim;
            }
        }

        if let Some(chunking) = file_config.chunking {
            if let Some(size) = chunking.chunk_size {
                config.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunking.chunk_overlap {
                config.chunking.chunk_overlap = overlap;
            }
            if let Some(mode) = chunking.long_lines {
                config.chunking.long_lines = mode;
            }
        }

        if let Some(top_k) = file_config.retrieval.and_then(|r| r.top_k) {
            config.retrieval.top_k = top_k;
        }

        if let Some(grading) = file_config.grading {
            if let Some(attempts) = grading.max_attempts {
                config.grading.max_attempts = attempts;
            }
            if let Some(backoff) = grading.retry_backoff_ms {
                config.grading.retry_backoff_ms = backoff;
            }
            if let Some(mode) = grading.structured_output {
                config.grading.structured_output = mode;
            }
        }

        if let Some(root_dir) = file_config.index.and_then(|i| i.root_dir) {
            config.index.root_dir = root_dir;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rag-grader")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    ///
    /// A missing API key is a startup failure, not a per-submission one.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(GraderError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(GraderError::Config(
                "LLM API key is required. Set LLM_API_KEY (or GROQ_API_KEY) environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(GraderError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        self.validate_pipeline()
    }

    /// Validate the settings that do not involve the LLM endpoint.
    pub fn validate_pipeline(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(GraderError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(GraderError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(GraderError::Config("top_k must be at least 1".to_string()));
        }

        if self.grading.max_attempts == 0 {
            return Err(GraderError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.embedding.backend == EmbeddingBackend::Hash && self.embedding.hash_dimension == 0 {
            return Err(GraderError::Config(
                "hash_dimension must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}='{}'", key, raw);
            None
        }
    }
}
