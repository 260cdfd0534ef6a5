//! Incremental indexing
//!
//! [`IndexManager`] keeps one project's vector index in sync with the
//! files on disk. A reconciliation pass scans the tree, short-circuits when
//! the aggregate hash is unchanged, re-embeds only files whose hash tag
//! moved, drops chunks of files that left the scan, then commits and
//! persists the result.

use crate::chunker::{embedding_input, Chunker, Language};
use crate::config::Config;
use crate::embedder::{create_provider, embed_with_retry, EmbeddingProvider};
use crate::error::{Result, SiftError};
use crate::filter::PathFilter;
use crate::hasher::{aggregate_hash, hash_files, hash_tag, needs_reindex, INDEX_FORMAT_VERSION};
use crate::index::{ChunkDraft, SharedIndex, VectorIndex};
use crate::project::{Project, ProjectRegistry};
use crate::rerank::{create_judge, RelevanceJudge};
use crate::scanner::{apply_cap, CapWarning, FileRecord, TreeScanner};
use crate::searcher::SearchService;
use crate::store::{FileStore, KeyValueStore};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// First retry delay for a failed embedding call
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_LEN: usize = 8000;

/// Everything the indexing core needs, passed in explicitly
#[derive(Clone)]
pub struct IndexContext {
    pub config: Config,
    /// `None` turns indexing and search into no-ops
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// `None` disables reranking
    pub judge: Option<Arc<dyn RelevanceJudge>>,
    pub store: Arc<dyn KeyValueStore>,
}

impl IndexContext {
    /// A context without providers; attach them with the `with_*` methods
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            embedder: None,
            judge: None,
            store,
        })
    }

    /// Providers and file store as selected by `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.data_dir.clone()));
        let embedder = create_provider(&config)?;
        let judge = create_judge(&config.remote)?;
        let mut ctx = Self::new(config, store)?;
        ctx.embedder = embedder;
        ctx.judge = judge;
        Ok(ctx)
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.judge = Some(judge);
        self
    }
}

/// How a reconciliation pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileOutcome {
    /// No embedding provider is configured
    #[default]
    Disabled,
    /// Aggregate hash matched; nothing was touched
    Unchanged,
    /// Changes were applied and committed
    Updated,
    /// Stopped early; completed files were committed
    Cancelled,
}

/// Statistics for a reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    /// Number of new files indexed
    pub added: usize,
    /// Number of files re-indexed after a content change
    pub updated: usize,
    /// Number of files whose chunks were dropped because they left the scan
    pub removed_files: usize,
    /// Number of unchanged files
    pub unchanged: usize,
    /// Binary or unreadable files
    pub skipped: usize,
    /// Files whose embedding failed; retried next pass
    pub failed: usize,
    /// Set when the scan exceeded the file cap
    pub cap_warning: Option<CapWarning>,
    /// The pass completed in memory but its snapshot or project hash could
    /// not be written; the next session re-checks every file
    pub persist_failed: bool,
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Added: {}, Updated: {}, Removed: {}, Unchanged: {}, Skipped: {}, Failed: {}",
            self.added, self.updated, self.removed_files, self.unchanged, self.skipped, self.failed
        )
    }
}

/// Live counters of a running pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileProgress {
    /// Files that need (re-)embedding
    pub total: usize,
    /// Files finished, successfully or not
    pub done: usize,
    /// Files that failed
    pub failed: usize,
}

/// A reconciliation running in the background
pub struct ReconcileHandle {
    progress: watch::Receiver<ReconcileProgress>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<Result<ReconcileReport>>,
}

impl ReconcileHandle {
    /// Progress updates
    pub fn progress(&self) -> watch::Receiver<ReconcileProgress> {
        self.progress.clone()
    }

    /// Stop starting new files; files already embedding still complete
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pass to end
    pub async fn join(self) -> Result<ReconcileReport> {
        self.task.await?
    }
}

/// One file queued for embedding
struct FileJob {
    path: PathBuf,
    key: String,
    is_new: bool,
}

enum FileOutcome {
    Indexed { chunks: usize },
    Binary,
    Cancelled,
}

/// Keeps one project's index current
pub struct IndexManager {
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    judge: Option<Arc<dyn RelevanceJudge>>,
    store: Arc<dyn KeyValueStore>,
    registry: ProjectRegistry,
    project: Mutex<Project>,
    index: SharedIndex,
    /// Set when the persisted snapshot was unusable: the next pass must not
    /// trust the stored aggregate hash
    snapshot_stale: AtomicBool,
    /// Serializes passes
    pass_lock: Mutex<()>,
    chunker: Chunker,
}

impl IndexManager {
    /// Open (or create) the project at `root` and restore its index
    pub fn open(ctx: IndexContext, root: &Path) -> Result<Self> {
        let IndexContext {
            config,
            embedder,
            judge,
            store,
        } = ctx;

        let registry = ProjectRegistry::new(Arc::clone(&store));
        let project = registry.open(root)?;
        let (index, stale) = restore_index(store.as_ref(), &project, embedder.as_deref());

        info!(
            "Opened project {} ({} chunks restored)",
            project.name,
            index.chunk_count()
        );

        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);

        Ok(Self {
            config,
            embedder,
            judge,
            store,
            registry,
            project: Mutex::new(project),
            index: SharedIndex::new(index),
            snapshot_stale: AtomicBool::new(stale),
            pass_lock: Mutex::new(()),
            chunker,
        })
    }

    /// Current project record
    pub async fn project(&self) -> Project {
        self.project.lock().await.clone()
    }

    /// The last committed index
    pub async fn index(&self) -> Arc<VectorIndex> {
        self.index.current().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether an embedding provider is available
    pub fn is_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    /// A search service reading this manager's committed index
    pub async fn searcher(&self) -> SearchService {
        SearchService::new(
            self.index.clone(),
            self.embedder.clone(),
            self.judge.clone(),
            self.project.lock().await.path.clone(),
        )
    }

    /// Run a reconciliation pass to completion
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let (progress, _) = watch::channel(ReconcileProgress::default());
        self.run_pass(&progress, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Start a reconciliation pass in the background
    pub fn spawn_reconcile(self: &Arc<Self>) -> ReconcileHandle {
        let (tx, rx) = watch::channel(ReconcileProgress::default());
        let cancel = Arc::new(AtomicBool::new(false));

        let manager = Arc::clone(self);
        let flag = Arc::clone(&cancel);
        let task = tokio::spawn(async move { manager.run_pass(&tx, flag).await });

        ReconcileHandle {
            progress: rx,
            cancel,
            task,
        }
    }

    async fn run_pass(
        &self,
        progress: &watch::Sender<ReconcileProgress>,
        cancel: Arc<AtomicBool>,
    ) -> Result<ReconcileReport> {
        let _pass = self.pass_lock.lock().await;

        let Some(embedder) = self.embedder.clone() else {
            info!("No embedding provider configured, skipping indexing");
            return Ok(ReconcileReport::default());
        };

        let root = self.project.lock().await.path.clone();
        if !root.is_dir() {
            return Err(SiftError::MissingRoot(root));
        }

        let (files, cap_warning, tags) = self.scan(root).await?;
        if let Some(warning) = &cap_warning {
            warn!("{}", warning);
        }

        let aggregate = aggregate_hash(
            files
                .iter()
                .map(|f| f.relative_path.as_path())
                .zip(&tags),
        );
        let stale = self.snapshot_stale.load(Ordering::SeqCst);
        if !stale && !needs_reindex(&*self.project.lock().await, &aggregate) {
            info!("No changes since last index ({} files)", files.len());
            return Ok(ReconcileReport {
                outcome: ReconcileOutcome::Unchanged,
                unchanged: files.len(),
                cap_warning,
                ..Default::default()
            });
        }

        let mut report = ReconcileReport {
            outcome: ReconcileOutcome::Updated,
            cap_warning,
            ..Default::default()
        };

        let working = Arc::new(RwLock::new((*self.index.current().await).clone()));
        let survivors: HashSet<String> = files.iter().map(|f| path_key(&f.path)).collect();

        let mut jobs = Vec::new();
        {
            let index = working.read().await;
            for (file, tag) in files.iter().zip(&tags) {
                let key = path_key(&file.path);
                let Some(tag) = tag else {
                    report.skipped += 1;
                    continue;
                };
                match index.file_tag(&key) {
                    Some(existing) if existing == tag => report.unchanged += 1,
                    existing => jobs.push(FileJob {
                        path: file.path.clone(),
                        key,
                        is_new: existing.is_none(),
                    }),
                }
            }
        }

        info!(
            "Reconciling {} files ({} to embed, {} unchanged)",
            files.len(),
            jobs.len(),
            report.unchanged
        );
        progress.send_modify(|p| p.total = jobs.len());

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let cancel = Arc::clone(&cancel);
            let embedder = Arc::clone(&embedder);
            let working = Arc::clone(&working);
            let chunker = self.chunker.clone();
            let retries = self.config.embed_retries;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (job, Err(SiftError::Index("worker pool closed".into())));
                };
                let outcome = if cancel.load(Ordering::SeqCst) {
                    Ok(FileOutcome::Cancelled)
                } else {
                    index_file(&job, embedder.as_ref(), &chunker, &working, retries).await
                };
                (job, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let failed = match joined {
                Ok((job, Ok(FileOutcome::Indexed { chunks }))) => {
                    debug!("Indexed {} ({} chunks)", job.key, chunks);
                    if job.is_new {
                        report.added += 1;
                    } else {
                        report.updated += 1;
                    }
                    false
                }
                Ok((job, Ok(FileOutcome::Binary))) => {
                    debug!("Skipping non-text file {}", job.key);
                    report.skipped += 1;
                    false
                }
                Ok((_, Ok(FileOutcome::Cancelled))) => false,
                Ok((job, Err(e))) => {
                    warn!("Failed to index {}: {}", job.key, e);
                    report.failed += 1;
                    true
                }
                Err(e) => {
                    warn!("Indexing task aborted: {}", e);
                    report.failed += 1;
                    true
                }
            };
            progress.send_modify(|p| {
                p.done += 1;
                if failed {
                    p.failed += 1;
                }
            });
        }

        let cancelled = cancel.load(Ordering::SeqCst);
        if !cancelled {
            report.removed_files = working.write().await.retain_only(&survivors);
        }

        let index = working.read().await.clone();
        if let Err(e) = self.commit(index).await {
            warn!("Failed to persist index snapshot: {}", e);
            report.persist_failed = true;
        }

        if cancelled {
            info!("Reconciliation cancelled: {}", report);
            report.outcome = ReconcileOutcome::Cancelled;
            return Ok(report);
        }

        if report.failed == 0 && !report.persist_failed {
            let mut project = self.project.lock().await;
            let previous = std::mem::replace(&mut project.files_hash, aggregate);
            match self.registry.update(&project) {
                Ok(()) => self.snapshot_stale.store(false, Ordering::SeqCst),
                Err(e) => {
                    warn!("Failed to record project hash: {}", e);
                    project.files_hash = previous;
                    report.persist_failed = true;
                }
            }
        } else if report.failed > 0 {
            warn!(
                "{} files failed to index; they will be retried on the next pass",
                report.failed
            );
        }

        info!("Reconciliation finished: {}", report);
        Ok(report)
    }

    /// Scan, cap and hash on the blocking pool
    async fn scan(
        &self,
        root: PathBuf,
    ) -> Result<(Vec<FileRecord>, Option<CapWarning>, Vec<Option<String>>)> {
        let max_file_size = self.config.max_file_size;
        let max_files = self.config.max_files;

        tokio::task::spawn_blocking(move || {
            let filter = PathFilter::build(&root)?;
            let files = TreeScanner::new(max_file_size).scan(&root, &filter);
            let (files, warning) = apply_cap(files, max_files);
            let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
            let tags = hash_files(&paths);
            Ok((files, warning, tags))
        })
        .await?
    }

    /// Publish the index, then persist it. Searches see the new index even
    /// when persisting fails.
    async fn commit(&self, index: VectorIndex) -> Result<()> {
        let key = self.project.lock().await.index_key();
        let bytes = index.to_bytes();
        self.index.publish(index).await;
        let bytes = bytes?;
        self.store.set(&key, &bytes)?;
        debug!("Persisted index snapshot ({} bytes)", bytes.len());
        Ok(())
    }
}

/// Chunk, embed and swap in one file's records
async fn index_file(
    job: &FileJob,
    embedder: &dyn EmbeddingProvider,
    chunker: &Chunker,
    working: &RwLock<VectorIndex>,
    retries: u32,
) -> Result<FileOutcome> {
    let bytes = tokio::fs::read(&job.path).await?;
    // Tag what was actually read; the file may have changed since hashing
    let tag = hash_tag(&bytes);

    let Some(text) = as_text(&bytes) else {
        working.write().await.delete_by_file(&job.key);
        return Ok(FileOutcome::Binary);
    };

    let language = Language::from_path(&job.path);
    let chunks = chunker.split(text, language);
    let inputs: Vec<String> = chunks
        .iter()
        .map(|c| embedding_input(&job.key, &c.text))
        .collect();

    let vectors = embed_with_retry(embedder, &inputs, retries, RETRY_BASE_DELAY).await?;

    let drafts: Vec<ChunkDraft> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| ChunkDraft {
            file_path: job.key.clone(),
            vector,
            text: chunk.text,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            file_tag: tag.clone(),
            language,
        })
        .collect();
    let count = drafts.len();

    working.write().await.replace_file(&job.key, drafts)?;
    Ok(FileOutcome::Indexed { chunks: count })
}

/// Load the persisted snapshot; the flag is true when it had to be thrown away
fn restore_index(
    store: &dyn KeyValueStore,
    project: &Project,
    embedder: Option<&dyn EmbeddingProvider>,
) -> (VectorIndex, bool) {
    let (model_name, dimension) = embedder
        .map(|e| (e.model_name().to_string(), e.dimension()))
        .unwrap_or_default();
    let fresh = || VectorIndex::new(model_name.clone(), dimension);

    let bytes = match store.get(&project.index_key()) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return (fresh(), !project.files_hash.is_empty()),
        Err(e) => {
            warn!("Failed to read index snapshot: {}", e);
            return (fresh(), true);
        }
    };

    match VectorIndex::from_bytes(&bytes) {
        Ok(snapshot) if snapshot.format_version != INDEX_FORMAT_VERSION => {
            info!(
                "Index format {} is outdated (now {}), rebuilding",
                snapshot.format_version, INDEX_FORMAT_VERSION
            );
            (fresh(), true)
        }
        Ok(snapshot)
            if embedder.is_some()
                && (snapshot.dimension != dimension || snapshot.model_name != model_name) =>
        {
            info!(
                "Index was built with {} ({} dims), provider is {} ({} dims), rebuilding",
                snapshot.model_name, snapshot.dimension, model_name, dimension
            );
            (fresh(), true)
        }
        Ok(snapshot) => (VectorIndex::from_snapshot(snapshot), false),
        Err(e) => {
            warn!("Discarding unreadable index snapshot: {}", e);
            (fresh(), true)
        }
    }
}

/// Text content of a file, or `None` for binary data
fn as_text(bytes: &[u8]) -> Option<&str> {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if head.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
