// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project layout and managed tree traversal.
//!
//! Determine where the engine keeps its own bookkeeping inside a project, and
//! which parts of the project it is allowed to touch at all.
//!
//! # Managed Roots
//!
//! A __managed root__ is a top-level directory the engine owns, e.g.,
//! `.tendril` or `.claude`. Template files are only ever written beneath a
//! managed root, backups only ever copy from managed roots, and cleanup of
//! empty directories never climbs past one.
//!
//! # Protected Paths
//!
//! A __protected path__ is a subtree inside a managed root that holds user
//! owned data, e.g., task notes or a personal workspace. Protected subtrees are
//! never backed up, migrated, or cleaned up. The walker provided here prunes
//! them before descending, so every caller that walks a managed tree gets this
//! guarantee for free.
//!
//! # Relative Paths
//!
//! All managed paths are stored as project relative strings using `/` as the
//! separator no matter the platform. This keeps the hash record portable, and
//! makes prefix checks on directory renames trivial.

use crate::config::Settings;

use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use std::{
    collections::BTreeSet,
    fs::{read_dir, remove_dir},
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Fixed locations of engine bookkeeping inside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    state_dir: String,
}

impl ProjectLayout {
    /// Construct new project layout.
    ///
    /// # Errors
    ///
    /// - Return [`LayoutError::InvalidPath`] if configured state directory is
    ///   not a valid relative path.
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            state_dir: normalize(&settings.state_dir)?,
        })
    }

    /// Absolute path to project root.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Project relative path of the state directory.
    pub fn state_dir(&self) -> &str {
        self.state_dir.as_str()
    }

    /// Resolve project relative path to an absolute path.
    pub fn resolve(&self, relative: impl AsRef<str>) -> PathBuf {
        resolve(&self.root, relative.as_ref())
    }

    /// Path to the persisted hash record.
    pub fn hash_record_path(&self) -> PathBuf {
        self.resolve(&self.state_dir).join(".template-hashes.json")
    }

    /// Path to the version marker.
    pub fn version_marker_path(&self) -> PathBuf {
        self.resolve(&self.state_dir).join(".version")
    }

    /// Directory that receives timestamped backup snapshots.
    pub fn backup_parent(&self) -> PathBuf {
        self.resolve(&self.state_dir)
    }

    /// Directory that receives generated follow-up documents.
    pub fn followup_dir(&self) -> PathBuf {
        self.resolve(&self.state_dir).join("followups")
    }
}

/// Set of managed roots and the protected subtrees within them.
///
/// # Invariant
///
/// - All stored paths are normalized.
/// - Protected checks are component-wise, so `.tendril/task` never matches a
///   protected `.tendril/tasks`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManagedRoots {
    roots: BTreeSet<String>,
    protected: BTreeSet<String>,
}

impl ManagedRoots {
    /// Construct new managed root set.
    ///
    /// # Errors
    ///
    /// - Return [`LayoutError::InvalidPath`] if any root or protected path is
    ///   not a valid relative path.
    pub fn new(
        roots: impl IntoIterator<Item = impl AsRef<str>>,
        protected: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let roots = roots
            .into_iter()
            .map(|root| normalize(root.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        let protected = protected
            .into_iter()
            .map(|path| normalize(path.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(Self { roots, protected })
    }

    /// Iterate through managed roots.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }

    /// Iterate through protected paths.
    pub fn protected(&self) -> impl Iterator<Item = &str> {
        self.protected.iter().map(String::as_str)
    }

    /// Check if path is exactly one of the managed roots.
    pub fn is_root(&self, path: &str) -> bool {
        self.roots.contains(path)
    }

    /// Find innermost managed root that contains path.
    pub fn root_of(&self, path: &str) -> Option<&str> {
        self.roots
            .iter()
            .filter(|root| is_within(path, root))
            .max_by_key(|root| root.len())
            .map(String::as_str)
    }

    /// Check if path lives beneath, or is, a managed root.
    pub fn is_managed(&self, path: &str) -> bool {
        self.root_of(path).is_some()
    }

    /// Check if path lives beneath, or is, a protected path.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|protected| is_within(path, protected))
    }

    /// Check if a protected path lives strictly beneath given directory.
    pub fn contains_protected(&self, dir: &str) -> bool {
        self.protected
            .iter()
            .any(|protected| protected != dir && is_within(protected, dir))
    }
}

/// File yielded by a managed tree walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Normalized path relative to walk base.
    pub relative: String,

    /// Absolute path on disk.
    pub absolute: PathBuf,
}

/// Walker over managed trees that never descends into protected subtrees.
///
/// This is the one place that knows how to traverse managed content. Backup,
/// migration classification, and template discovery all go through it.
#[derive(Debug, Clone)]
pub struct ManagedTree {
    base: PathBuf,
    roots: ManagedRoots,
    exclude: Vec<Pattern>,
}

impl ManagedTree {
    /// Construct new managed tree walker rooted at `base`.
    pub fn new(base: impl Into<PathBuf>, roots: ManagedRoots) -> Self {
        Self {
            base: base.into(),
            roots,
            exclude: Vec::new(),
        }
    }

    /// Skip any path matching one of the given glob patterns.
    ///
    /// # Errors
    ///
    /// - Return [`LayoutError::Pattern`] if a pattern is malformed.
    pub fn with_exclusions(
        mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            self.exclude
                .push(Pattern::new(pattern).map_err(|err| LayoutError::Pattern {
                    source: err,
                    pattern: pattern.to_string(),
                })?);
        }

        Ok(self)
    }

    /// Root set used to prune protected subtrees.
    pub fn roots(&self) -> &ManagedRoots {
        &self.roots
    }

    /// Walk every regular file beneath `start`, relative to walk base.
    ///
    /// Yields nothing if `start` does not exist, is protected, or is excluded.
    /// Entries arrive sorted by file name at each level, so output is stable
    /// across runs.
    pub fn walk(&self, start: &str) -> Box<dyn Iterator<Item = Result<WalkEntry>>> {
        // INVARIANT: Only yield regular files, never symlinks or directories.
        self.entries(start, |kind| kind.is_file())
    }

    /// Walk every entry beneath `start` that is neither a regular file nor a
    /// directory, e.g., symlinks, sockets, or fifos.
    ///
    /// Same pruning rules as [`ManagedTree::walk`].
    pub fn walk_irregular(&self, start: &str) -> Box<dyn Iterator<Item = Result<WalkEntry>>> {
        self.entries(start, |kind| !kind.is_file() && !kind.is_dir())
    }

    fn entries(
        &self,
        start: &str,
        keep: fn(&std::fs::FileType) -> bool,
    ) -> Box<dyn Iterator<Item = Result<WalkEntry>>> {
        let start_path = resolve(&self.base, start);
        if !start.is_empty() && (self.is_skipped(start) || !start_path.exists()) {
            return Box::new(std::iter::empty());
        }

        let base = self.base.clone();
        let filter_base = self.base.clone();
        let roots = self.roots.clone();
        let exclude = self.exclude.clone();
        let walker = WalkBuilder::new(&start_path)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|lhs, rhs| lhs.cmp(rhs))
            .filter_entry(move |entry| match relative_to(&filter_base, entry.path()) {
                Some(relative) => {
                    !roots.is_protected(&relative) && !matches_any(&exclude, &relative)
                }
                None => true,
            })
            .build();

        Box::new(walker.filter_map(move |result| match result {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|kind| keep(&kind)) {
                    return None;
                }
                let relative = relative_to(&base, entry.path())?;
                Some(Ok(WalkEntry {
                    relative,
                    absolute: entry.into_path(),
                }))
            }
            Err(err) => Some(Err(LayoutError::Walk(err))),
        }))
    }

    /// Walk every regular file of every managed root.
    pub fn walk_roots(&self) -> impl Iterator<Item = Result<WalkEntry>> + '_ {
        self.roots.roots().flat_map(|root| self.walk(root))
    }

    fn is_skipped(&self, relative: &str) -> bool {
        self.roots.is_protected(relative) || matches_any(&self.exclude, relative)
    }
}

/// Remove directories left empty after a file-level removal.
///
/// Climbs from the parent of `relative` toward the project root, removing each
/// empty directory. Stops at the first directory that is non-empty, is a
/// managed root, is protected, or lies outside every managed root. Returns the
/// directories that were removed.
///
/// # Errors
///
/// - Return [`LayoutError::Prune`] if an empty directory cannot be removed.
pub fn prune_empty_parents(
    base: &Path,
    relative: &str,
    roots: &ManagedRoots,
) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    let mut current = parent_of(relative);

    while let Some(dir) = current {
        // INVARIANT: Never remove a managed root, nor anything outside or protected.
        if roots.is_root(dir) || !roots.is_managed(dir) || roots.is_protected(dir) {
            break;
        }

        let path = resolve(base, dir);
        let is_empty = match read_dir(&path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if !is_empty {
            break;
        }

        remove_dir(&path).map_err(|err| LayoutError::Prune {
            source: err,
            path: path.clone(),
        })?;
        debug!("pruned empty directory {dir}");
        removed.push(dir.to_string());
        current = parent_of(dir);
    }

    Ok(removed)
}

/// Normalize a relative path into its managed string form.
///
/// Converts `\` to `/`, drops `.` and empty components, and strips trailing
/// separators.
///
/// # Errors
///
/// - Return [`LayoutError::InvalidPath`] if path is empty, absolute, or
///   contains a parent component.
pub fn normalize(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') || Path::new(path).is_absolute() {
        return Err(LayoutError::InvalidPath {
            path: path.to_string(),
            reason: "absolute paths are not allowed",
        });
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(LayoutError::InvalidPath {
                    path: path.to_string(),
                    reason: "parent components are not allowed",
                })
            }
            part => parts.push(part),
        }
    }

    if parts.is_empty() {
        return Err(LayoutError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty",
        });
    }

    Ok(parts.join("/"))
}

/// Check if `path` equals `prefix` or lives beneath it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Parent of a relative path, if it has one.
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Number of components in a relative path.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|part| !part.is_empty()).count()
}

/// Join a relative path onto a base directory.
pub fn resolve(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |path, part| path.join(part))
}

fn relative_to(base: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(base).ok()?;
    let parts = stripped
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if parts.is_empty() {
        return None;
    }

    Some(parts.join("/"))
}

fn matches_any(patterns: &[Pattern], relative: &str) -> bool {
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };
    patterns
        .iter()
        .any(|pattern| pattern.matches_with(relative, options))
}

/// Layout and traversal error types.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// Path cannot be used as a managed relative path.
    #[error("invalid managed path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Exclusion pattern cannot be compiled.
    #[error("invalid exclusion pattern {pattern:?}")]
    Pattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },

    /// Directory traversal fails.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Empty directory cannot be removed.
    #[error("failed to remove empty directory {:?}", path.display())]
    Prune {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LayoutError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use tempfile::TempDir;

    fn roots() -> ManagedRoots {
        ManagedRoots::new([".tendril", ".claude"], [".tendril/tasks"]).unwrap()
    }

    #[test]
    fn normalize_unifies_separators() -> anyhow::Result<()> {
        assert_eq!(normalize("./a//b/./c/")?, "a/b/c");
        assert_eq!(normalize("a\\b")?, "a/b");
        assert!(normalize("../a").is_err());
        assert!(normalize("/etc/passwd").is_err());
        assert!(normalize("./").is_err());
        Ok(())
    }

    #[test]
    fn protected_matching_is_component_wise() {
        let roots = roots();
        assert!(roots.is_protected(".tendril/tasks"));
        assert!(roots.is_protected(".tendril/tasks/01/task.md"));
        assert!(!roots.is_protected(".tendril/task"));
        assert!(!roots.is_protected(".tendril/tasks-old/a"));
        assert!(roots.contains_protected(".tendril"));
        assert!(!roots.contains_protected(".tendril/tasks"));
    }

    #[test]
    fn root_of_picks_innermost_root() -> anyhow::Result<()> {
        let roots = ManagedRoots::new([".github", ".github/workflows"], Vec::<String>::new())?;
        assert_eq!(roots.root_of(".github/workflows/ci.yml"), Some(".github/workflows"));
        assert_eq!(roots.root_of(".github/CODEOWNERS"), Some(".github"));
        assert_eq!(roots.root_of("src/main.rs"), None);
        Ok(())
    }

    #[test]
    fn walk_skips_protected_and_excluded() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        for path in [
            ".tendril/config.toml",
            ".tendril/tasks/01/task.md",
            ".tendril/.backup-2025/a.md",
            ".claude/commands/start.md",
            "README.md",
        ] {
            let full = resolve(dir.path(), path);
            create_dir_all(full.parent().unwrap())?;
            write(full, "x")?;
        }

        let tree = ManagedTree::new(dir.path(), roots()).with_exclusions(["**/.backup-*"])?;
        let mut files = tree
            .walk_roots()
            .map(|entry| entry.map(|entry| entry.relative))
            .collect::<Result<Vec<_>>>()?;
        files.sort();

        assert_eq!(
            files,
            vec![".claude/commands/start.md", ".tendril/config.toml"]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn walk_irregular_finds_symlinks_only() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".claude/commands"))?;
        write(dir.path().join(".claude/commands/start.md"), "x")?;
        std::os::unix::fs::symlink("start.md", dir.path().join(".claude/commands/link.md"))?;

        let tree = ManagedTree::new(dir.path(), roots());
        let regular = tree
            .walk(".claude")
            .map(|entry| entry.map(|entry| entry.relative))
            .collect::<Result<Vec<_>>>()?;
        let irregular = tree
            .walk_irregular(".claude")
            .map(|entry| entry.map(|entry| entry.relative))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(regular, vec![".claude/commands/start.md"]);
        assert_eq!(irregular, vec![".claude/commands/link.md"]);
        Ok(())
    }

    #[test]
    fn walk_missing_start_yields_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let tree = ManagedTree::new(dir.path(), roots());
        assert_eq!(tree.walk(".claude/nothing").count(), 0);
        Ok(())
    }

    #[test]
    fn prune_stops_at_managed_root() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".claude/commands/deep/er"))?;

        let removed = prune_empty_parents(dir.path(), ".claude/commands/deep/er/file.md", &roots())?;

        assert_eq!(
            removed,
            vec![".claude/commands/deep/er", ".claude/commands/deep", ".claude/commands"]
        );
        assert!(dir.path().join(".claude").is_dir());
        Ok(())
    }

    #[test]
    fn prune_never_touches_protected_paths() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".tendril/tasks/empty"))?;

        let removed = prune_empty_parents(dir.path(), ".tendril/tasks/empty/gone.md", &roots())?;

        assert!(removed.is_empty());
        assert!(dir.path().join(".tendril/tasks/empty").is_dir());
        Ok(())
    }

    #[test]
    fn prune_stops_at_non_empty_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".claude/a/b"))?;
        write(dir.path().join(".claude/a/keep.md"), "keep")?;

        let removed = prune_empty_parents(dir.path(), ".claude/a/b/gone.md", &roots())?;

        assert_eq!(removed, vec![".claude/a/b"]);
        assert!(dir.path().join(".claude/a/keep.md").is_file());
        Ok(())
    }
}
