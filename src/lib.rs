//! # codesift - Incremental semantic code search
//!
//! Indexes a source tree into embedded chunks and answers natural-language
//! queries against it. Re-indexing is incremental: only files whose content
//! changed are chunked and embedded again.
//!
//! ## Features
//!
//! - **Incremental**: an aggregate hash skips unchanged trees, per-file
//!   hash tags skip unchanged files
//! - **Ignore-aware**: honours `.gitignore` and a project `.siftignore`
//! - **Pluggable providers**: local ONNX embeddings via fastembed, or any
//!   OpenAI-compatible endpoint
//! - **Reranking**: an optional chat model reorders the best candidates
//! - **Watch Mode**: reconciles automatically as files change
//!
//! ## Example
//!
//! ```no_run
//! use codesift::{Config, IndexContext, IndexManager, SearchOptions};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = IndexContext::from_config(Config::default())?;
//!     let manager = IndexManager::open(ctx, Path::new("."))?;
//!
//!     let report = manager.reconcile().await?;
//!     println!("{}", report);
//!
//!     let searcher = manager.searcher().await;
//!     for hit in searcher.search("authentication handler", &SearchOptions::default()).await? {
//!         println!("{}:{} (score: {:.2})", hit.file_path, hit.start_line, hit.score);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod index;
pub mod indexer;
pub mod project;
pub mod rerank;
pub mod scanner;
pub mod searcher;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use chunker::{Chunker, Language, TextChunk};
pub use config::{Config, EmbeddingModel, ProviderKind, RemoteConfig, SearchOptions};
pub use embedder::{EmbeddingProvider, LocalEmbedder, OpenAiEmbedder};
pub use error::{Result, SiftError};
pub use filter::PathFilter;
pub use index::{ChunkRecord, VectorIndex};
pub use indexer::{
    IndexContext, IndexManager, ReconcileHandle, ReconcileOutcome, ReconcileProgress,
    ReconcileReport,
};
pub use project::{Project, ProjectRegistry};
pub use rerank::{ChatJudge, RelevanceJudge, RerankCandidate};
pub use scanner::{CapWarning, FileRecord, TreeScanner};
pub use searcher::{format_results, format_results_json, IndexStats, SearchHit, SearchService};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use watcher::IndexWatcher;
