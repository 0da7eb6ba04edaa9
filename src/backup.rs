// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pre-update backup snapshots.
//!
//! Before the first mutation of a run, every managed file outside protected
//! and excluded paths is copied into `<state>/.backup-<timestamp>`. The copy is
//! built in a `.partial` staging directory and renamed into place once
//! complete, so a visible backup directory always holds a full snapshot.
//!
//! Restoring is a plain copy back out of the snapshot directory.

use crate::layout::{self, ManagedRoots, ManagedTree, ProjectLayout, WalkEntry};

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs::{copy, remove_dir_all, rename},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Take snapshots of managed files.
#[derive(Debug, Clone)]
pub struct BackupManager {
    parent: PathBuf,
    tree: ManagedTree,
}

impl BackupManager {
    /// Construct new backup manager.
    ///
    /// Prior snapshots inside the state directory are always excluded, on top
    /// of the given exclusion patterns.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Layout`] if an exclusion pattern is malformed.
    pub fn new(
        project: &ProjectLayout,
        roots: &ManagedRoots,
        exclude: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let own = format!("{}/.backup-*", project.state_dir());
        let patterns = exclude
            .into_iter()
            .map(|pattern| pattern.as_ref().to_string())
            .chain([own])
            .collect::<Vec<_>>();
        let tree = ManagedTree::new(project.root(), roots.clone()).with_exclusions(patterns)?;

        Ok(Self {
            parent: project.backup_parent(),
            tree,
        })
    }

    /// Collect every file that a snapshot would copy.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Layout`] if a managed root cannot be walked.
    pub fn candidates(&self) -> Result<Vec<WalkEntry>> {
        Ok(self.tree.walk_roots().collect::<Result<Vec<_>, _>>()?)
    }

    /// Copy all qualifying managed files into a new timestamped directory.
    ///
    /// Returns `None` without creating anything if no file qualifies.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Layout`] if a managed root cannot be walked.
    /// - Return [`BackupError::Copy`] if a file cannot be copied.
    /// - Return [`BackupError::Finalize`] if staging directory cannot be
    ///   renamed into place.
    #[instrument(skip(self, bar), level = "debug")]
    pub fn snapshot(&self, bar: &ProgressBar) -> Result<Option<PathBuf>> {
        let entries = self.candidates()?;
        if entries.is_empty() {
            info!("nothing to back up");
            return Ok(None);
        }

        let target = self.next_target();
        let staging = PathBuf::from(format!("{}.partial", target.display()));
        debug!("stage backup at {:?}", staging.display());

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {pos}/{len}",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message("backing up");
        bar.set_length(entries.len() as u64);

        if let Err(err) = copy_entries(&entries, &staging, bar) {
            // INVARIANT: Never leave a half-written snapshot behind.
            if let Err(cleanup) = remove_dir_all(&staging) {
                warn!("failed to clean up {:?}: {cleanup}", staging.display());
            }
            bar.abandon();
            return Err(err);
        }

        rename(&staging, &target).map_err(|err| BackupError::Finalize {
            source: err,
            path: target.clone(),
        })?;
        bar.finish_and_clear();
        info!("backed up {} files to {:?}", entries.len(), target.display());

        Ok(Some(target))
    }

    fn next_target(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let mut target = self.parent.join(format!(".backup-{stamp}"));
        let mut suffix = 1;
        while target.exists() || Path::new(&format!("{}.partial", target.display())).exists() {
            target = self.parent.join(format!(".backup-{stamp}-{suffix}"));
            suffix += 1;
        }

        target
    }
}

fn copy_entries(entries: &[WalkEntry], staging: &Path, bar: &ProgressBar) -> Result<()> {
    for entry in entries {
        let destination = layout::resolve(staging, &entry.relative);
        if let Some(parent) = destination.parent() {
            mkdirp::mkdirp(parent).map_err(|err| BackupError::Copy {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        copy(&entry.absolute, &destination).map_err(|err| BackupError::Copy {
            source: err,
            path: entry.absolute.clone(),
        })?;
        bar.inc(1);
    }

    Ok(())
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Managed tree cannot be walked.
    #[error(transparent)]
    Layout(#[from] crate::layout::LayoutError),

    /// File cannot be copied into snapshot.
    #[error("failed to back up {:?}", path.display())]
    Copy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Staging directory cannot be renamed into place.
    #[error("failed to finalize backup {:?}", path.display())]
    Finalize {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_dir, read_to_string, write};
    use tempfile::TempDir;

    fn put(base: &Path, path: &str, content: &str) {
        let full = layout::resolve(base, path);
        create_dir_all(full.parent().unwrap()).unwrap();
        write(full, content).unwrap();
    }

    fn manager(dir: &TempDir) -> BackupManager {
        let settings = Settings::default();
        let project = ProjectLayout::new(dir.path(), &settings).unwrap();
        let roots = ManagedRoots::new([".tendril", ".claude"], settings.protected_paths()).unwrap();
        BackupManager::new(&project, &roots, &settings.backup_exclude).unwrap()
    }

    fn backups(dir: &TempDir) -> Vec<String> {
        let mut names = read_dir(dir.path().join(".tendril"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".backup-"))
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn snapshot_copies_managed_files_only() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        put(dir.path(), ".claude/commands/start.md", "start");
        put(dir.path(), ".tendril/.version", "0.2.0");
        put(dir.path(), ".tendril/tasks/01/task.md", "mine");
        put(dir.path(), ".tendril/scratch.tmp", "transient");
        put(dir.path(), "src/main.rs", "fn main() {}");

        let target = manager(&dir).snapshot(&ProgressBar::hidden())?.unwrap();

        assert_eq!(read_to_string(target.join(".claude/commands/start.md"))?, "start");
        assert_eq!(read_to_string(target.join(".tendril/.version"))?, "0.2.0");
        assert!(!target.join(".tendril/tasks").exists());
        assert!(!target.join(".tendril/scratch.tmp").exists());
        assert!(!target.join("src").exists());
        assert_eq!(backups(&dir).len(), 1);
        assert!(!backups(&dir)[0].ends_with(".partial"));

        Ok(())
    }

    #[test]
    fn empty_project_creates_no_backup() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        put(dir.path(), ".tendril/tasks/01/task.md", "mine");

        assert_eq!(manager(&dir).snapshot(&ProgressBar::hidden())?, None);
        assert!(backups(&dir).is_empty());

        Ok(())
    }

    #[test]
    fn snapshots_never_nest() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        put(dir.path(), ".claude/a.md", "a");
        let manager = manager(&dir);

        let first = manager.snapshot(&ProgressBar::hidden())?.unwrap();
        let second = manager.snapshot(&ProgressBar::hidden())?.unwrap();

        assert_ne!(first, second);
        assert_eq!(backups(&dir).len(), 2);
        assert!(!second
            .join(".tendril")
            .join(first.file_name().unwrap())
            .exists());

        Ok(())
    }
}
