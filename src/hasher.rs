//! Content fingerprints for change detection
//!
//! A file's hash tag is the SHA-256 of its bytes followed by
//! [`INDEX_FORMAT_VERSION`]; bumping the version invalidates every stored
//! chunk without looking at content. The aggregate hash folds the tags of
//! a whole scan into one value so an unchanged project can skip
//! reconciliation entirely.

use crate::error::Result;
use crate::project::Project;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Appended to every content hash; bump when chunking or embedding changes.
pub const INDEX_FORMAT_VERSION: &str = "v1";

/// Hash of a file's bytes plus the index format version
pub fn hash_tag(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut tag = hex::encode(hasher.finalize());
    tag.push_str(INDEX_FORMAT_VERSION);
    tag
}

/// Read a file and compute its hash tag
pub fn file_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_tag(&bytes))
}

/// Hash many files in parallel.
///
/// The output is aligned with `paths`; a file that cannot be read yields
/// `None` and is logged.
pub fn hash_files(paths: &[PathBuf]) -> Vec<Option<String>> {
    paths
        .par_iter()
        .map(|path| match file_hash(path) {
            Ok(tag) => Some(tag),
            Err(e) => {
                warn!("Failed to hash {:?}: {}", path, e);
                None
            }
        })
        .collect()
}

/// Fold `(root-relative path, tag)` pairs, in scan order, into a single
/// fingerprint. Paths are part of it so renames and moves register;
/// unreadable files (`None`) contribute nothing.
pub fn aggregate_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a Path, &'a Option<String>)>,
{
    let mut hasher = Sha256::new();
    for (path, tag) in entries {
        let Some(tag) = tag else { continue };
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(tag.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// Whether the project's stored fingerprint differs from the current one
pub fn needs_reindex(project: &Project, aggregate: &str) -> bool {
    project.files_hash != aggregate
}
