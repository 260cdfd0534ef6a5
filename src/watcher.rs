//! File system watcher for live index updates
//!
//! Watches the project root and runs a reconciliation whenever a debounced
//! batch of events touches a path the ignore rules let through. Events are
//! bridged from the debouncer thread into tokio over an unbounded channel.

use crate::error::{Result, SiftError};
use crate::filter::PathFilter;
use crate::indexer::{IndexManager, ReconcileOutcome, ReconcileReport};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Quiet period before a batch of events is delivered
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Keeps an [`IndexManager`] in sync with its tree
pub struct IndexWatcher {
    manager: Arc<IndexManager>,
    debounce: Duration,
}

impl IndexWatcher {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self {
            manager,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Reconcile once, then again after every relevant change.
    ///
    /// `on_pass` sees every report. Runs until the event stream ends;
    /// callers stop it by dropping the future (e.g. in `tokio::select!`).
    pub async fn watch<F>(&self, mut on_pass: F) -> Result<()>
    where
        F: FnMut(&ReconcileReport),
    {
        let root = self.manager.project().await.path;
        let data_dir = self.manager.config().data_dir.clone();

        let report = self.manager.reconcile().await?;
        info!("Initial sync: {}", report);
        on_pass(&report);

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            // The receiver is gone once the watch future is dropped
            let _ = tx.send(result);
        })
        .map_err(|e| SiftError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| SiftError::Watch(e.to_string()))?;
        info!("Watching {:?} for changes", root);

        while let Some(result) = rx.recv().await {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    warn!("Watch error: {:?}", e);
                    continue;
                }
            };

            // Rules are rebuilt per batch so edits to ignore files apply
            let filter = match PathFilter::build(&root) {
                Ok(filter) => filter,
                Err(e) => {
                    warn!("Failed to load ignore rules: {}", e);
                    continue;
                }
            };

            let changed = relevant_changes(&events, &filter, &data_dir);
            if changed.is_empty() {
                debug!("Ignoring {} events", events.len());
                continue;
            }

            info!("Processing {} changed paths", changed.len());
            match self.manager.reconcile().await {
                Ok(report) => {
                    if report.outcome == ReconcileOutcome::Updated {
                        info!("Reconciled: {}", report);
                    }
                    on_pass(&report);
                }
                Err(e) => warn!("Reconciliation failed: {}", e),
            }
        }

        debug!("Watch channel closed");
        Ok(())
    }
}

/// Paths from a batch that the index cares about
pub fn relevant_changes(
    events: &[DebouncedEvent],
    filter: &PathFilter,
    data_dir: &Path,
) -> BTreeSet<PathBuf> {
    events
        .iter()
        .map(|event| &event.path)
        .filter(|path| !path.starts_with(data_dir))
        .filter(|path| !filter.is_ignored_abs(path, path.is_dir()))
        .cloned()
        .collect()
}
