//! Flat vector index
//!
//! Holds every chunk of a project together with its embedding and answers
//! nearest-neighbour queries by scanning all vectors. Vectors are
//! normalized on insert so cosine similarity is a dot product. The whole
//! collection round-trips through bincode as an [`IndexSnapshot`].

use crate::chunker::Language;
use crate::embedder::{cosine_similarity, normalize};
use crate::error::{Result, SiftError};
use crate::hasher::INDEX_FORMAT_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One embedded chunk of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique identifier for this chunk
    pub id: u64,
    /// Absolute path of the owning file, compared exactly
    pub file_path: String,
    /// Unit-length embedding
    pub vector: Vec<f32>,
    /// The text content
    pub text: String,
    /// Starting line number (1-indexed)
    pub start_line: usize,
    /// Ending line number (1-indexed)
    pub end_line: usize,
    /// Hash tag of the owning file when this chunk was created
    pub file_tag: String,
    /// Language used to split the file
    pub language: Language,
}

/// A chunk waiting for an id
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub file_path: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub file_tag: String,
    pub language: Language,
}

/// Persisted form of a [`VectorIndex`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// [`INDEX_FORMAT_VERSION`] at save time
    pub format_version: String,
    /// Model name used to create embeddings
    pub model_name: String,
    /// Embedding vector dimension
    pub dimension: usize,
    /// Next chunk ID to assign
    pub next_id: u64,
    /// All chunks in insertion order
    pub records: Vec<ChunkRecord>,
}

/// Query hit with its similarity
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched chunk
    pub record: ChunkRecord,
    /// Cosine similarity (-1.0 to 1.0, higher is better)
    pub score: f32,
}

/// Vector index for semantic search
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_name: String,
    dimension: usize,
    next_id: u64,
    records: Vec<ChunkRecord>,
}

impl VectorIndex {
    /// Create a new empty index
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            next_id: 0,
            records: Vec::new(),
        }
    }

    /// Append chunks, assigning fresh ids. Uniqueness per file is the
    /// caller's job (delete first, then insert).
    pub fn upsert(&mut self, drafts: Vec<ChunkDraft>) -> Result<()> {
        if let Some(bad) = drafts.iter().find(|d| d.vector.len() != self.dimension) {
            return Err(SiftError::Index(format!(
                "vector dimension {} does not match index dimension {} ({})",
                bad.vector.len(),
                self.dimension,
                bad.file_path
            )));
        }

        self.records.reserve(drafts.len());
        for draft in drafts {
            let mut vector = draft.vector;
            normalize(&mut vector);
            self.records.push(ChunkRecord {
                id: self.next_id,
                file_path: draft.file_path,
                vector,
                text: draft.text,
                start_line: draft.start_line,
                end_line: draft.end_line,
                file_tag: draft.file_tag,
                language: draft.language,
            });
            self.next_id += 1;
        }

        Ok(())
    }

    /// Swap a file's chunks for a new set in one step; the old and new
    /// sets are never both present.
    pub fn replace_file(&mut self, file_path: &str, drafts: Vec<ChunkDraft>) -> Result<usize> {
        if let Some(bad) = drafts.iter().find(|d| d.file_path != file_path) {
            return Err(SiftError::Index(format!(
                "draft for {} passed while replacing {}",
                bad.file_path, file_path
            )));
        }
        let removed = self.delete_by_file(file_path);
        self.upsert(drafts)?;
        Ok(removed)
    }

    /// Remove all chunks whose file path equals `file_path` exactly
    pub fn delete_by_file(&mut self, file_path: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.file_path != file_path);
        let removed = before - self.records.len();
        debug!("Removed {} chunks from {}", removed, file_path);
        removed
    }

    /// Remove every chunk whose file is not in `keep`; returns the number
    /// of distinct files dropped
    pub fn retain_only(&mut self, keep: &HashSet<String>) -> usize {
        let dropped: BTreeSet<String> = self
            .records
            .iter()
            .filter(|r| !keep.contains(&r.file_path))
            .map(|r| r.file_path.clone())
            .collect();
        self.records.retain(|r| keep.contains(&r.file_path));
        for file in &dropped {
            debug!("Dropped stale file {}", file);
        }
        dropped.len()
    }

    /// Top `k` chunks by cosine similarity, best first
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.records.is_empty() || vector.len() != self.dimension {
            return vec![];
        }

        let mut query = vector.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, cosine_similarity(&query, &r.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                record: self.records[i].clone(),
                score,
            })
            .collect()
    }

    /// Hash tag recorded for a file, if it has chunks
    pub fn file_tag(&self, file_path: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.file_path == file_path)
            .map(|r| r.file_tag.as_str())
    }

    /// All chunks of one file
    pub fn records_for(&self, file_path: &str) -> Vec<&ChunkRecord> {
        self.records
            .iter()
            .filter(|r| r.file_path == file_path)
            .collect()
    }

    /// Get all indexed file paths
    pub fn indexed_files(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.file_path.as_str()).collect()
    }

    /// All chunks in insertion order
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Get total number of chunks
    pub fn chunk_count(&self) -> usize {
        self.records.len()
    }

    /// Get total number of indexed files
    pub fn file_count(&self) -> usize {
        self.indexed_files().len()
    }

    /// Embedding vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model name used to create embeddings
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Capture the index for persistence
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            format_version: INDEX_FORMAT_VERSION.to_string(),
            model_name: self.model_name.clone(),
            dimension: self.dimension,
            next_id: self.next_id,
            records: self.records.clone(),
        }
    }

    /// Rebuild an index from a snapshot
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            model_name: snapshot.model_name,
            dimension: snapshot.dimension,
            next_id: snapshot.next_id,
            records: snapshot.records,
        }
    }

    /// Serialize the whole index
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.snapshot())?)
    }

    /// Decode bytes written by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<IndexSnapshot> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The last committed index, shared by the reconciler and searchers.
///
/// Readers clone an `Arc` and never wait for a running reconciliation;
/// the reconciler publishes a whole new index at commit time.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<Arc<VectorIndex>>>,
}

impl SharedIndex {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// The index as of the last commit
    pub async fn current(&self) -> Arc<VectorIndex> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Make `index` the committed index
    pub async fn publish(&self, index: VectorIndex) {
        *self.inner.write().await = Arc::new(index);
    }
}
