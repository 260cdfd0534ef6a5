//! Configuration types and constants for codesift
//!
//! Defines embedding providers and models, indexing limits and search
//! options. Every struct here is validated once at construction; the
//! components receive them through [`crate::indexer::IndexContext`].

use crate::error::{Result, SiftError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files larger than this are not worth indexing.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;

/// Default ceiling on the number of files one project may index.
pub const DEFAULT_MAX_FILES: usize = 500;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Supported local embedding models (all run locally via ONNX)
///
/// These models are downloaded on first use and cached locally.
/// No API keys or network access required after initial download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingModel {
    /// Fast, small model (384 dims, ~30MB) - good for most use cases
    #[default]
    AllMiniLmL6V2,
    /// Higher quality (384 dims, ~90MB) - better semantic understanding
    BgeSmallEnV15,
    /// Best quality for code (768 dims, ~90MB)
    NomicEmbedTextV15,
    /// Multilingual support (384 dims, ~470MB)
    MultilingualE5Small,
}

impl EmbeddingModel {
    /// Get the HuggingFace model identifier
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-ai/nomic-embed-text-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Get the embedding vector dimension
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 384,
            Self::BgeSmallEnV15 => 384,
            Self::NomicEmbedTextV15 => 768,
            Self::MultilingualE5Small => 384,
        }
    }
}

impl std::str::FromStr for EmbeddingModel {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minilm" | "all-minilm-l6-v2" | "default" => Ok(Self::AllMiniLmL6V2),
            "bge" | "bge-small" | "bge-small-en-v1.5" => Ok(Self::BgeSmallEnV15),
            "nomic" | "nomic-embed" | "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            "multilingual" | "e5" | "multilingual-e5-small" => Ok(Self::MultilingualE5Small),
            _ => Err(SiftError::Config(format!(
                "Unknown model: {}. Valid options: minilm, bge, nomic, multilingual",
                s
            ))),
        }
    }
}

/// Which embedding backend produces vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProviderKind {
    /// fastembed on the local machine
    #[default]
    Local,
    /// OpenAI-compatible `/embeddings` endpoint, needs `OPENAI_API_KEY`
    OpenAi,
}

impl std::str::FromStr for ProviderKind {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" | "remote" => Ok(Self::OpenAi),
            _ => Err(SiftError::Config(format!(
                "Unknown provider: {}. Valid options: local, openai",
                s
            ))),
        }
    }
}

/// Settings for the OpenAI-compatible providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Embedding model name
    pub embedding_model: String,
    /// Dimension of the embedding model's vectors
    pub embedding_dims: usize,
    /// Chat model used as the relevance judge
    pub chat_model: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_dims: 1536,
            chat_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Configuration for codesift indexing and search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the project registry, index snapshots and this config
    pub data_dir: PathBuf,
    /// Embedding backend
    pub provider: ProviderKind,
    /// Local embedding model (used by [`ProviderKind::Local`])
    pub model: EmbeddingModel,
    /// Remote provider settings (used by [`ProviderKind::OpenAi`] and reranking)
    pub remote: RemoteConfig,
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Maximum file size to index (bytes)
    pub max_file_size: u64,
    /// Maximum number of files indexed per project
    pub max_files: usize,
    /// Number of files embedded concurrently
    pub workers: usize,
    /// Extra attempts after a failed embedding call
    pub embed_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            provider: ProviderKind::default(),
            model: EmbeddingModel::default(),
            remote: RemoteConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: 0,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            workers: num_cpus::get(),
            embed_retries: 3,
        }
    }
}

impl Config {
    /// Create a new config storing its data under `data_dir`
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Set the embedding provider
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Set the local embedding model
    pub fn with_model(mut self, model: EmbeddingModel) -> Self {
        self.model = model;
        self
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the file-count cap
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Set the number of concurrent embedding workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Check the invariants every component relies on
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SiftError::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SiftError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_files == 0 {
            return Err(SiftError::Config("max_files must be positive".into()));
        }
        if self.workers == 0 {
            return Err(SiftError::Config("workers must be positive".into()));
        }
        if self.provider == ProviderKind::OpenAi && self.remote.embedding_dims == 0 {
            return Err(SiftError::Config(
                "remote.embedding_dims must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get path to the config file
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Load configuration from disk, falling back to defaults when absent
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.json");
        if !config_path.exists() {
            return Ok(Self::new(data_dir.to_path_buf()));
        }
        let json = std::fs::read_to_string(config_path)?;
        let mut config: Config = serde_json::from_str(&json)?;
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }
}

/// Options for a single search call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results returned
    pub limit: usize,
    /// Candidates scoring below this are dropped
    pub score_threshold: f32,
    /// Ask the relevance judge to reorder candidates
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: 0.5,
            rerank: true,
        }
    }
}

impl SearchOptions {
    /// Build validated options
    pub fn new(limit: usize, score_threshold: f32, rerank: bool) -> Result<Self> {
        if limit == 0 {
            return Err(SiftError::Config("limit must be positive".into()));
        }
        if !(-1.0..=1.0).contains(&score_threshold) {
            return Err(SiftError::Config(format!(
                "score_threshold {} is outside [-1, 1]",
                score_threshold
            )));
        }
        Ok(Self {
            limit,
            score_threshold,
            rerank,
        })
    }
}

/// Platform data directory, e.g. `~/.local/share/codesift`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codesift")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        let model: EmbeddingModel = "minilm".parse().unwrap();
        assert_eq!(model.dimension(), 384);

        let model: EmbeddingModel = "nomic".parse().unwrap();
        assert_eq!(model.dimension(), 768);

        assert!("invalid".parse::<EmbeddingModel>().is_err());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!("cohere".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 0);
        assert_eq!(config.max_file_size, 100_000);
        assert_eq!(config.max_files, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::default().with_chunk_size(0).validate().is_err());
        assert!(Config::default().with_max_files(0).validate().is_err());
        assert!(Config::default().with_workers(0).validate().is_err());

        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).with_max_files(42);
        config.save().unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.max_files, 42);
        assert_eq!(loaded.data_dir, dir.path());
    }

    #[test]
    fn test_load_missing_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.max_files, DEFAULT_MAX_FILES);
    }

    #[test]
    fn test_search_options() {
        let options = SearchOptions::default();
        assert_eq!(options.limit, 10);
        assert!(options.rerank);
        assert!(SearchOptions::new(0, 0.5, false).is_err());
        assert!(SearchOptions::new(5, 1.5, false).is_err());
        assert!(SearchOptions::new(5, 0.3, false).is_ok());
    }
}
