// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Migration execution.
//!
//! Apply accepted migrations to disk, keeping the hash record in step with
//! every move so that a renamed file keeps its "unmodified" status.
//!
//! # Ordering
//!
//! Directory renames run before file operations, and deeper directory renames
//! run before shallower ones. Thus `a/b/c -> x/y/z` completes before `a/b ->
//! x/y` moves its parent out from under it. The sort is stable, so file level
//! operations keep manifest order.
//!
//! # Failure Isolation
//!
//! Each item either applies fully or is reported as an [`ItemFailure`]. A
//! failed item never stops the rest of the batch.
//!
//! A directory rename whose destination was produced by an earlier item of
//! the same batch merges into it instead of replacing it, so nested renames
//! compose.
//!
//! # Interrupted Directory Renames
//!
//! A directory rename moves the subtree first and remaps hash records second.
//! If the process dies between those two steps, the moved files are left
//! untracked and later runs treat them as modified. Nothing is lost, and the
//! pre-update backup still holds the original layout.

use crate::{
    hash::HashStore,
    layout::{self, ManagedRoots},
    migration::{MigrationItem, MigrationKind},
    ItemFailure,
};

use std::{
    cmp::Reverse,
    fs::{read_dir, remove_dir, remove_dir_all, remove_file, rename, symlink_metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Sort migrations into safe execution order.
pub fn order(mut items: Vec<MigrationItem>) -> Vec<MigrationItem> {
    items.sort_by_key(|item| match item.kind {
        MigrationKind::RenameDirectory => (0, Reverse(layout::depth(&item.from))),
        _ => (1, Reverse(0)),
    });
    items
}

/// Give file the executable bit if its extension marks it as a script.
///
/// No-op on platforms without Unix permissions.
pub fn mark_executable(path: &Path, extensions: &[String]) -> std::io::Result<()> {
    let is_script = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext));
    if !is_script {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// Outcome of one execution batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Items applied, in execution order.
    pub applied: Vec<MigrationItem>,

    /// Items that failed, with cause.
    pub failed: Vec<ItemFailure>,

    /// Directories removed because a migration left them empty.
    pub pruned: Vec<String>,
}

/// Apply migrations to a project.
#[derive(Debug)]
pub struct MigrationExecutor<'a> {
    base: &'a Path,
    roots: &'a ManagedRoots,
    hashes: &'a mut HashStore,
    executable_extensions: &'a [String],
    landed: Vec<String>,
}

impl<'a> MigrationExecutor<'a> {
    /// Construct new migration executor.
    pub fn new(
        base: &'a Path,
        roots: &'a ManagedRoots,
        hashes: &'a mut HashStore,
        executable_extensions: &'a [String],
    ) -> Self {
        Self {
            base,
            roots,
            hashes,
            executable_extensions,
            landed: Vec::new(),
        }
    }

    /// Apply accepted migrations in safe order.
    ///
    /// Callers must only pass migrations that were classified as auto, or
    /// approved by the user. A rename onto an existing destination removes
    /// that destination first, unless an earlier item of this batch landed
    /// beneath it.
    #[instrument(skip(self, items), level = "debug")]
    pub fn execute(&mut self, items: Vec<MigrationItem>) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for item in order(items) {
            match self.apply(&item) {
                Ok(pruned) => {
                    info!("applied {item}");
                    report.pruned.extend(pruned);
                    report.applied.push(item);
                }
                Err(err) => {
                    warn!("failed to apply {item}: {err}");
                    report.failed.push(ItemFailure::new(item.from.clone(), err));
                }
            }
        }

        report
    }

    fn apply(&mut self, item: &MigrationItem) -> Result<Vec<String>> {
        let from = item.from.as_str();
        // INVARIANT: Never move or remove a managed root or a protected path.
        if self.roots.is_root(from) || self.roots.is_protected(from) {
            return Err(ExecuteError::Unsafe { path: from.into() });
        }

        let source = layout::resolve(self.base, from);
        let is_dir = match symlink_metadata(&source) {
            Ok(meta) => meta.is_dir(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ExecuteError::Vanished { path: from.into() })
            }
            Err(err) => return Err(io_error(err, &source)),
        };

        match item.kind {
            MigrationKind::Rename | MigrationKind::RenameDirectory => {
                let to = item.destination();
                if self.roots.is_root(to) || self.roots.is_protected(to) {
                    return Err(ExecuteError::Unsafe { path: to.into() });
                }

                // INVARIANT: Clearing a destination must never take the source with it.
                if layout::is_within(from, to) || layout::is_within(to, from) {
                    return Err(ExecuteError::Nested {
                        from: from.into(),
                        to: to.into(),
                    });
                }

                let destination = layout::resolve(self.base, to);
                let merge = is_dir
                    && self
                        .landed
                        .iter()
                        .any(|landed| landed != to && layout::is_within(landed, to));

                if merge {
                    merge_dir(&source, &destination)?;
                    self.hashes.merge(from, to);
                } else {
                    clear_destination(&destination)?;
                    if let Some(parent) = destination.parent() {
                        mkdirp::mkdirp(parent).map_err(|err| io_error(err, parent))?;
                    }
                    rename(&source, &destination).map_err(|err| io_error(err, &source))?;
                    self.hashes.rename(from, to);
                }
                self.landed.push(to.to_string());

                if !is_dir {
                    mark_executable(&destination, self.executable_extensions)
                        .map_err(|err| io_error(err, &destination))?;
                }
            }
            MigrationKind::Delete => {
                match is_dir {
                    true => remove_dir_all(&source),
                    false => remove_file(&source),
                }
                .map_err(|err| io_error(err, &source))?;
                self.hashes.remove(from);
            }
        }

        Ok(layout::prune_empty_parents(self.base, from, self.roots)?)
    }
}

fn clear_destination(destination: &Path) -> Result<()> {
    let result = match symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => remove_dir_all(destination),
        Ok(_) => remove_file(destination),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => Err(err),
    };

    result.map_err(|err| io_error(err, destination))
}

fn merge_dir(source: &Path, destination: &Path) -> Result<()> {
    for entry in read_dir(source).map_err(|err| io_error(err, source))? {
        let entry = entry.map_err(|err| io_error(err, source))?;
        let path = entry.path();
        let target = destination.join(entry.file_name());
        let is_dir = entry
            .file_type()
            .map_err(|err| io_error(err, &path))?
            .is_dir();

        if is_dir && target.is_dir() {
            merge_dir(&path, &target)?;
            continue;
        }

        clear_destination(&target)?;
        rename(&path, &target).map_err(|err| io_error(err, &path))?;
    }

    remove_dir(source).map_err(|err| io_error(err, source))
}

fn io_error(source: std::io::Error, path: &Path) -> ExecuteError {
    ExecuteError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// Migration execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// Source disappeared between classification and execution.
    #[error("source {path:?} no longer exists")]
    Vanished { path: String },

    /// Migration would touch a managed root or protected path.
    #[error("refusing to touch {path:?}")]
    Unsafe { path: String },

    /// Source and destination contain one another.
    #[error("cannot move {from:?} to {to:?}, one contains the other")]
    Nested { from: String, to: String },

    /// Filesystem operation fails.
    #[error("filesystem operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Empty parent cleanup fails.
    #[error(transparent)]
    Layout(#[from] crate::layout::LayoutError),
}

/// Friendly result alias :3
type Result<T, E = ExecuteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};
    use tempfile::TempDir;

    fn roots() -> ManagedRoots {
        ManagedRoots::new([".tendril", ".claude"], [".tendril/tasks"]).unwrap()
    }

    fn put(base: &Path, path: &str, content: &str) {
        let full = layout::resolve(base, path);
        create_dir_all(full.parent().unwrap()).unwrap();
        write(full, content).unwrap();
    }

    #[test]
    fn deeper_directory_renames_run_first() {
        let ordered = order(vec![
            MigrationItem::delete("a/file.md"),
            MigrationItem::rename_directory("a/b", "x/y"),
            MigrationItem::rename("a/one.md", "a/two.md"),
            MigrationItem::rename_directory("a/b/c", "x/y/z"),
        ]);

        assert_eq!(
            ordered,
            vec![
                MigrationItem::rename_directory("a/b/c", "x/y/z"),
                MigrationItem::rename_directory("a/b", "x/y"),
                MigrationItem::delete("a/file.md"),
                MigrationItem::rename("a/one.md", "a/two.md"),
            ]
        );
    }

    #[test]
    fn rename_moves_file_hash_and_prunes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let roots = roots();
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/old/deep/run.sh", "echo");
        hashes.update(".claude/old/deep/run.sh", "echo");
        let extensions = vec!["sh".to_string()];

        let report = MigrationExecutor::new(dir.path(), &roots, &mut hashes, &extensions)
            .execute(vec![MigrationItem::rename(
                ".claude/old/deep/run.sh",
                ".claude/new/run.sh",
            )]);

        assert_eq!(report.failed, Vec::new());
        assert_eq!(report.pruned, vec![".claude/old/deep", ".claude/old"]);
        assert_eq!(read_to_string(dir.path().join(".claude/new/run.sh"))?, "echo");
        assert_eq!(hashes.get(".claude/old/deep/run.sh"), None);
        assert_eq!(hashes.get(".claude/new/run.sh"), Some(content_hash("echo").as_str()));
        assert!(dir.path().join(".claude").is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(".claude/new/run.sh"))?
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        Ok(())
    }

    #[test]
    fn nested_directory_renames_compose() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let roots = roots();
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/a/b/c/deep.md", "deep");
        put(dir.path(), ".claude/a/b/top.md", "top");
        hashes.update(".claude/a/b/c/deep.md", "deep");
        hashes.update(".claude/a/b/top.md", "top");

        let report = MigrationExecutor::new(dir.path(), &roots, &mut hashes, &[]).execute(vec![
            MigrationItem::rename_directory(".claude/a/b", ".claude/x/y"),
            MigrationItem::rename_directory(".claude/a/b/c", ".claude/x/y/z"),
        ]);

        assert_eq!(report.failed, Vec::new());
        assert_eq!(read_to_string(dir.path().join(".claude/x/y/z/deep.md"))?, "deep");
        assert_eq!(read_to_string(dir.path().join(".claude/x/y/top.md"))?, "top");
        assert!(!dir.path().join(".claude/a").exists());
        assert_eq!(
            hashes.iter().map(|(path, _)| path).collect::<Vec<_>>(),
            vec![".claude/x/y/top.md", ".claude/x/y/z/deep.md"]
        );

        Ok(())
    }

    #[test]
    fn directory_rename_replaces_destination_and_stale_hashes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let roots = roots();
        let mut hashes = HashStore::default();
        put(dir.path(), ".tendril/structure/a.md", "a");
        put(dir.path(), ".tendril/spec/stale.md", "stale");
        hashes.update(".tendril/structure/a.md", "a");
        hashes.update(".tendril/spec/stale.md", "stale");

        MigrationExecutor::new(dir.path(), &roots, &mut hashes, &[]).execute(vec![
            MigrationItem::rename_directory(".tendril/structure", ".tendril/spec"),
        ]);

        assert!(!dir.path().join(".tendril/spec/stale.md").exists());
        assert_eq!(
            hashes.iter().map(|(path, _)| path).collect::<Vec<_>>(),
            vec![".tendril/spec/a.md"]
        );

        Ok(())
    }

    #[test]
    fn flattening_into_parent_is_refused() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let roots = roots();
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/commands/tendril/start.md", "start");
        put(dir.path(), ".claude/commands/other.md", "other");
        hashes.update(".claude/commands/tendril/start.md", "start");
        hashes.update(".claude/commands/other.md", "other");
        let before = hashes.clone();

        let report = MigrationExecutor::new(dir.path(), &roots, &mut hashes, &[]).execute(vec![
            MigrationItem::rename_directory(".claude/commands/tendril", ".claude/commands"),
            MigrationItem::rename_directory(".claude/commands", ".claude/commands/tendril/old"),
        ]);

        assert!(report.applied.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert_eq!(
            read_to_string(dir.path().join(".claude/commands/tendril/start.md"))?,
            "start"
        );
        assert_eq!(read_to_string(dir.path().join(".claude/commands/other.md"))?, "other");
        assert_eq!(hashes, before);

        Ok(())
    }

    #[test]
    fn failures_do_not_stop_batch() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let roots = roots();
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/keep/other.md", "other");
        put(dir.path(), ".claude/keep/gone.md", "gone");
        hashes.update(".claude/keep/gone.md", "gone");

        let report = MigrationExecutor::new(dir.path(), &roots, &mut hashes, &[]).execute(vec![
            MigrationItem::delete(".claude/missing.md"),
            MigrationItem::delete(".tendril/tasks"),
            MigrationItem::delete(".claude/keep/gone.md"),
        ]);

        assert_eq!(
            report.failed.iter().map(|failure| failure.path.as_str()).collect::<Vec<_>>(),
            vec![".claude/missing.md", ".tendril/tasks"]
        );
        assert_eq!(report.applied, vec![MigrationItem::delete(".claude/keep/gone.md")]);
        assert!(report.pruned.is_empty());
        assert!(hashes.is_empty());

        Ok(())
    }
}
