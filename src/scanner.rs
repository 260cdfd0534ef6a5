//! Project tree traversal
//!
//! Depth-first walk in file-name order, pruning ignored directories and
//! dropping empty or oversized files. Unreadable directories are logged
//! and skipped so one bad folder never loses the rest of the scan.

use crate::filter::PathFilter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// How many directories a cap warning lists
const DENSE_DIR_REPORT: usize = 10;

/// A candidate file produced by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the project root
    pub relative_path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Raised when a scan produced more files than the configured cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapWarning {
    /// Number of candidates before truncation
    pub total: usize,
    /// Number of files kept
    pub kept: usize,
    /// Directories holding the most candidates, densest first
    pub dense_dirs: Vec<(String, usize)>,
}

impl std::fmt::Display for CapWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Too many files to index ({}); only the first {} will be indexed.",
            self.total, self.kept
        )?;
        writeln!(f, "Consider excluding some of these folders in .siftignore:")?;
        for (dir, count) in &self.dense_dirs {
            writeln!(f, "  {} ({} files)", dir, count)?;
        }
        Ok(())
    }
}

/// Walks a project directory into a list of indexable files
pub struct TreeScanner {
    max_file_size: u64,
}

impl TreeScanner {
    /// Create a scanner dropping files larger than `max_file_size` bytes
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Scan `root`, returning surviving files in deterministic order
    pub fn scan(&self, root: &Path, filter: &PathFilter) -> Vec<FileRecord> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                !filter.is_ignored(relative, entry.file_type().is_dir())
            });

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Failed to stat {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            if size == 0 || size > self.max_file_size {
                debug!("Skipping {:?} ({} bytes)", entry.path(), size);
                continue;
            }

            let relative_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();

            files.push(FileRecord {
                path: entry.path().to_path_buf(),
                relative_path,
                size,
            });
        }

        files
    }
}

/// Keep the first `cap` files in scan order.
///
/// When truncation happens the warning names the directories contributing
/// the most candidates, so the ignore rules can be extended.
pub fn apply_cap(mut files: Vec<FileRecord>, cap: usize) -> (Vec<FileRecord>, Option<CapWarning>) {
    if files.len() <= cap {
        return (files, None);
    }

    let warning = CapWarning {
        total: files.len(),
        kept: cap,
        dense_dirs: dense_directories(&files, DENSE_DIR_REPORT),
    };
    files.truncate(cap);
    (files, Some(warning))
}

/// Count candidates per ancestor directory, densest first
fn dense_directories(files: &[FileRecord], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for file in files {
        let mut prefix = PathBuf::new();
        let parent = file.relative_path.parent().unwrap_or(Path::new(""));
        for component in parent.components() {
            prefix.push(component);
            *counts
                .entry(prefix.to_string_lossy().to_string())
                .or_insert(0) += 1;
        }
    }

    let mut dirs: Vec<(String, usize)> = counts.into_iter().collect();
    dirs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    dirs.truncate(limit);
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relative(files: &[FileRecord]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_orders_and_filters() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.py", "print('b')");
        write(dir.path(), "a.py", "print('a')");
        write(dir.path(), "src/lib.rs", "pub fn x() {}");
        write(dir.path(), "empty.txt", "");
        write(dir.path(), "big.txt", &"x".repeat(200));
        write(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;");

        let filter = PathFilter::build(dir.path()).unwrap();
        let files = TreeScanner::new(100).scan(dir.path(), &filter);

        assert_eq!(relative(&files), vec!["a.py", "b.py", "src/lib.rs"]);
        assert!(files.iter().all(|f| f.path.is_absolute()));
        assert_eq!(files[0].size, 10);
    }

    #[test]
    fn test_ignored_log_file_is_never_listed() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".siftignore", "*.log\n");
        write(dir.path(), "debug.log", "noise");
        write(dir.path(), "app.js", "console.log(1)");

        let filter = PathFilter::build(dir.path()).unwrap();
        let files = TreeScanner::new(100_000).scan(dir.path(), &filter);

        let names = relative(&files);
        assert!(!names.iter().any(|n| n.ends_with("debug.log")));
        assert!(names.contains(&"app.js".to_string()));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            write(dir.path(), &format!("d{}/f{}.txt", i % 3, i), "content");
        }
        let filter = PathFilter::build(dir.path()).unwrap();
        let scanner = TreeScanner::new(100_000);

        assert_eq!(scanner.scan(dir.path(), &filter), scanner.scan(dir.path(), &filter));
    }

    #[test]
    fn test_cap_keeps_prefix_and_reports_dense_dirs() {
        let dir = tempdir().unwrap();
        for i in 0..6 {
            write(dir.path(), &format!("gen/out/f{}.txt", i), "generated");
        }
        write(dir.path(), "main.rs", "fn main() {}");

        let filter = PathFilter::build(dir.path()).unwrap();
        let scanner = TreeScanner::new(100_000);
        let files = scanner.scan(dir.path(), &filter);
        let expected_prefix = files[..3].to_vec();

        let (kept, warning) = apply_cap(files, 3);
        assert_eq!(kept, expected_prefix);

        let warning = warning.expect("cap exceeded");
        assert_eq!(warning.total, 7);
        assert_eq!(warning.kept, 3);
        assert_eq!(warning.dense_dirs[0], ("gen".to_string(), 6));
        assert_eq!(warning.dense_dirs[1].1, 6);

        // Same tree, same selection
        let (again, _) = apply_cap(scanner.scan(dir.path(), &filter), 3);
        assert_eq!(again, kept);
    }

    #[test]
    fn test_cap_not_exceeded() {
        let (kept, warning) = apply_cap(Vec::new(), 10);
        assert!(kept.is_empty());
        assert!(warning.is_none());
    }
}
