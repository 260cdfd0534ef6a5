//! Project records
//!
//! A project is identified by its absolute root path. The registry keeps
//! every known project in the key-value store under one key and hands out
//! the store key of each project's index snapshot.

use crate::error::{Result, SiftError};
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const PROJECTS_KEY: &str = "projects";

/// A directory that has been opened for indexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Display name, unique among projects
    pub name: String,
    /// Absolute root path (identity)
    pub path: PathBuf,
    /// Last time the project was opened
    pub last_opened: DateTime<Utc>,
    /// Aggregate hash of the last fully successful reconciliation
    pub files_hash: String,
}

impl Project {
    /// A fresh, never-indexed project
    pub fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            last_opened: Utc::now(),
            files_hash: String::new(),
        }
    }

    /// Store key of this project's index snapshot
    pub fn index_key(&self) -> String {
        let digest = Sha256::digest(self.path.to_string_lossy().as_bytes());
        format!("index.{}", &hex::encode(digest)[..16])
    }
}

/// Persisted list of projects
#[derive(Clone)]
pub struct ProjectRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl ProjectRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Open the project rooted at `root`, creating it on first use and
    /// touching `last_opened` otherwise.
    ///
    /// A missing root is reported as [`SiftError::MissingRoot`].
    pub fn open(&self, root: &Path) -> Result<Project> {
        let path = std::fs::canonicalize(root)
            .map_err(|_| SiftError::MissingRoot(root.to_path_buf()))?;
        if !path.is_dir() {
            return Err(SiftError::MissingRoot(root.to_path_buf()));
        }

        let mut projects = self.load_all()?;

        let project = match projects.iter_mut().find(|p| p.path == path) {
            Some(existing) => {
                existing.last_opened = Utc::now();
                debug!("Reopened project {}", existing.name);
                existing.clone()
            }
            None => {
                let name = unique_name(&projects, &path);
                info!("Created project {} for {:?}", name, path);
                let project = Project::new(name, path);
                projects.push(project.clone());
                project
            }
        };

        self.save_all(&projects)?;
        Ok(project)
    }

    /// Persist changes to a known project (matched by path)
    pub fn update(&self, project: &Project) -> Result<()> {
        let mut projects = self.load_all()?;
        match projects.iter_mut().find(|p| p.path == project.path) {
            Some(existing) => *existing = project.clone(),
            None => projects.push(project.clone()),
        }
        self.save_all(&projects)
    }

    /// Projects sorted by most recently opened.
    ///
    /// Projects whose root disappeared are dropped and their index
    /// snapshot deleted.
    pub fn list(&self) -> Result<Vec<Project>> {
        let (mut alive, gone): (Vec<Project>, Vec<Project>) =
            self.load_all()?.into_iter().partition(|p| p.path.is_dir());

        for project in &gone {
            info!("Forgetting project {} ({:?} no longer exists)", project.name, project.path);
            self.store.delete(&project.index_key())?;
        }

        alive.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        if !gone.is_empty() {
            self.save_all(&alive)?;
        }
        Ok(alive)
    }

    /// Look a project up by root path without touching it
    pub fn find(&self, root: &Path) -> Result<Option<Project>> {
        let path = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Ok(self.load_all()?.into_iter().find(|p| p.path == path))
    }

    fn load_all(&self) -> Result<Vec<Project>> {
        match self.store.get(PROJECTS_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_all(&self, projects: &[Project]) -> Result<()> {
        let json = serde_json::to_vec_pretty(projects)?;
        self.store.set(PROJECTS_KEY, &json)
    }
}

/// Directory basename, suffixed with ` (n)` when already taken
fn unique_name(projects: &[Project], path: &Path) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let taken = |name: &str| projects.iter().any(|p| p.name == name);
    if !taken(&base) {
        return base;
    }

    let mut i = 1;
    while taken(&format!("{} ({})", base, i)) {
        i += 1;
    }
    format!("{} ({})", base, i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::tempdir;

    fn registry() -> (ProjectRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ProjectRegistry::new(store.clone()), store)
    }

    #[test]
    fn test_open_creates_then_touches() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry();

        let first = registry.open(dir.path()).unwrap();
        assert!(first.path.is_absolute());
        assert!(first.files_hash.is_empty());

        let second = registry.open(dir.path()).unwrap();
        assert_eq!(second.name, first.name);
        assert!(second.last_opened >= first.last_opened);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry();
        let result = registry.open(&dir.path().join("nope"));
        assert!(matches!(result, Err(SiftError::MissingRoot(_))));
    }

    #[test]
    fn test_names_are_disambiguated() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let c = tempdir().unwrap();
        for dir in [&a, &b, &c] {
            std::fs::create_dir(dir.path().join("app")).unwrap();
        }
        let (registry, _) = registry();

        let names: Vec<String> = [&a, &b, &c]
            .iter()
            .map(|d| registry.open(&d.path().join("app")).unwrap().name)
            .collect();
        assert_eq!(names, vec!["app", "app (1)", "app (2)"]);
    }

    #[test]
    fn test_update_persists_hash() {
        let dir = tempdir().unwrap();
        let (registry, _) = registry();

        let mut project = registry.open(dir.path()).unwrap();
        project.files_hash = "abc".into();
        registry.update(&project).unwrap();

        let found = registry.find(dir.path()).unwrap().unwrap();
        assert_eq!(found.files_hash, "abc");
    }

    #[test]
    fn test_list_prunes_missing_projects() {
        let keep = tempdir().unwrap();
        let gone = tempdir().unwrap();
        let gone_root = gone.path().join("old");
        std::fs::create_dir(&gone_root).unwrap();
        let (registry, store) = registry();

        registry.open(keep.path()).unwrap();
        let old = registry.open(&gone_root).unwrap();
        store.set(&old.index_key(), b"snapshot").unwrap();

        std::fs::remove_dir(&gone_root).unwrap();
        let projects = registry.list().unwrap();

        assert_eq!(projects.len(), 1);
        assert_eq!(store.get(&old.index_key()).unwrap(), None);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_sorted_by_last_opened() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (registry, _) = registry();

        let mut pa = registry.open(a.path()).unwrap();
        let mut pb = registry.open(b.path()).unwrap();
        pa.last_opened = Utc::now() - chrono::Duration::hours(2);
        pb.last_opened = Utc::now() - chrono::Duration::hours(1);
        registry.update(&pa).unwrap();
        registry.update(&pb).unwrap();

        let listed = registry.list().unwrap();
        assert_eq!(listed[0].path, pb.path);
        assert_eq!(listed[1].path, pa.path);
    }
}
