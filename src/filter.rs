//! Ignore rules for project traversal
//!
//! Compiles `.gitignore` plus either the project's `.siftignore` or the
//! built-in default list into one gitignore-style matcher. Paths are
//! matched relative to the project root.

use crate::error::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Project-local override of the default ignore list
pub const OVERRIDE_FILE: &str = ".siftignore";

/// VCS ignore file unioned into the rules
pub const VCS_IGNORE_FILE: &str = ".gitignore";

/// Used when the project has no `.siftignore`
pub const DEFAULT_IGNORE: &str = "\
# Version control
.svn/
.hg/

# Dependencies and build output
node_modules/
bower_components/
vendor/
target/
dist/
build/
out/
coverage/
.next/
.nuxt/
__pycache__/
.venv/
venv/
*.egg-info/

# Editors
.idea/
.vscode/

# Lockfiles and generated artifacts
package-lock.json
yarn.lock
pnpm-lock.yaml
Cargo.lock
poetry.lock
*.min.js
*.min.css
*.map
*.log

# Binary assets
*.png
*.jpg
*.jpeg
*.gif
*.ico
*.svg
*.pdf
*.zip
*.gz
*.tar
*.woff
*.woff2
*.ttf
*.eot
*.mp3
*.mp4
*.exe
*.dll
*.so
*.dylib
*.class
*.pyc
";

/// Compiled ignore predicate for one project root
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    matcher: Gitignore,
}

impl PathFilter {
    /// Compile the rules for `root`; absent rule files are not an error
    pub fn build(root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        add_rules(&mut builder, None, ".git/");

        let vcs_path = root.join(VCS_IGNORE_FILE);
        if let Some(text) = read_rules(&vcs_path) {
            add_rules(&mut builder, Some(vcs_path), &text);
        }

        let override_path = root.join(OVERRIDE_FILE);
        match read_rules(&override_path) {
            Some(text) => add_rules(&mut builder, Some(override_path), &text),
            None => add_rules(&mut builder, None, DEFAULT_IGNORE),
        }

        let matcher = builder.build()?;
        debug!("Compiled {} ignore rules for {:?}", matcher.num_ignores(), root);

        Ok(Self {
            root: root.to_path_buf(),
            matcher,
        })
    }

    /// Project root the rules are anchored at
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a root-relative path (or any of its parents) is ignored
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Like [`is_ignored`](Self::is_ignored) for an absolute path; paths
    /// outside the root are reported as ignored.
    pub fn is_ignored_abs(&self, path: &Path, is_dir: bool) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.is_ignored(relative, is_dir),
            Err(_) => true,
        }
    }
}

fn read_rules(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read ignore file {:?}: {}", path, e);
            None
        }
    }
}

fn add_rules(builder: &mut GitignoreBuilder, source: Option<PathBuf>, text: &str) {
    for line in text.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        if let Err(e) = builder.add_line(source.clone(), line) {
            warn!("Skipping ignore rule {:?}: {}", line, e);
        }
    }
}
