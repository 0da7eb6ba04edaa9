// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template change analysis.
//!
//! Compare the template set against what is on disk and what the hash record
//! remembers, tagging every template with exactly one [`ChangeKind`]:
//!
//! | On disk                        | Stored hash             | Kind                  |
//! |--------------------------------|-------------------------|-----------------------|
//! | nothing                        | any                     | `New`                 |
//! | same bytes as template         | any                     | `Unchanged`           |
//! | different bytes                | matches disk content    | `AutoUpdate`          |
//! | different bytes                | missing or different    | `NeedsConfirmation`   |
//!
//! Content equality is checked before hashes, since it is both cheaper and
//! certain. A template only ever auto-updates a file the user provably never
//! touched, and user edits never block template changes elsewhere.
//!
//! # Projection
//!
//! When migrations are still pending, the analyzer can look at disk state
//! _as it will be_ once they run. A [`Projection`] maps each template path
//! back to where its content currently lives, so a template at a rename
//! destination is compared with the file that is about to arrive there.

use crate::{
    hash::HashStore,
    layout::{self, is_within},
    migration::{execute, MigrationItem, MigrationKind},
    template::TemplateSet,
    ItemFailure,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read,
    io::ErrorKind,
    path::Path,
};
use tracing::{debug, instrument};

/// Classification of one template against disk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// No file exists at the template path.
    New,

    /// File content equals template content.
    Unchanged,

    /// Template moved on, user never touched the file.
    AutoUpdate,

    /// User edited the file, or it cannot be proven otherwise.
    NeedsConfirmation,
}

impl Display for ChangeKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::New => "new",
            Self::Unchanged => "unchanged",
            Self::AutoUpdate => "auto-update",
            Self::NeedsConfirmation => "needs confirmation",
        })
    }
}

/// Template path tagged with its change kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Result of analyzing a whole template set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// One entry per analyzed template, in path order.
    pub changes: Vec<ClassifiedChange>,

    /// Templates whose on-disk counterpart could not be read.
    pub failures: Vec<ItemFailure>,
}

impl ChangeSet {
    /// Iterate through paths of given kind.
    pub fn paths(&self, kind: ChangeKind) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(move |change| change.kind == kind)
            .map(|change| change.path.as_str())
    }

    /// Number of templates of given kind.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.paths(kind).count()
    }

    /// Kind assigned to path, if it was analyzed.
    pub fn kind_of(&self, path: &str) -> Option<ChangeKind> {
        self.changes
            .iter()
            .find(|change| change.path == path)
            .map(|change| change.kind)
    }

    /// Check if applying the set would write anything.
    pub fn has_writes(&self) -> bool {
        self.changes
            .iter()
            .any(|change| change.kind != ChangeKind::Unchanged)
    }
}

/// Where the content for a template path comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Content currently lives at this path.
    At(String),

    /// Path will be emptied by a pending migration.
    Vacated,
}

/// Disk state after a batch of pending migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    steps: Vec<MigrationItem>,
}

impl Projection {
    /// Projection of current disk state with nothing pending.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Project disk state after given migrations run.
    pub fn from_migrations(items: impl IntoIterator<Item = MigrationItem>) -> Self {
        Self {
            steps: execute::order(items.into_iter().collect()),
        }
    }

    /// Check if projection changes nothing.
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Trace path back through pending migrations to its current location.
    pub fn origin(&self, path: &str) -> Origin {
        let mut current = path.to_string();
        for step in self.steps.iter().rev() {
            if step.kind != MigrationKind::Delete {
                let to = step.destination();
                if is_within(&current, to) {
                    current = format!("{}{}", step.from, &current[to.len()..]);
                    continue;
                }
            }

            if is_within(&current, &step.from) {
                return Origin::Vacated;
            }
        }

        Origin::At(current)
    }
}

/// Classify templates against disk and hash record.
#[derive(Debug)]
pub struct ChangeAnalyzer<'a> {
    base: &'a Path,
    hashes: &'a HashStore,
}

impl<'a> ChangeAnalyzer<'a> {
    /// Construct new change analyzer.
    pub fn new(base: &'a Path, hashes: &'a HashStore) -> Self {
        Self { base, hashes }
    }

    /// Classify every template in set.
    ///
    /// Total over the set: every template lands in exactly one kind, or in
    /// the failure list when its on-disk counterpart cannot be read.
    #[instrument(skip(self, templates, projection), level = "debug")]
    pub fn analyze(&self, templates: &TemplateSet, projection: &Projection) -> ChangeSet {
        let mut set = ChangeSet::default();
        for entry in templates {
            let path = entry.path();
            match self.classify(path, entry.content(), projection) {
                Ok(kind) => {
                    debug!("{path} => {kind}");
                    set.changes.push(ClassifiedChange {
                        path: path.to_string(),
                        kind,
                    });
                }
                Err(err) => set.failures.push(ItemFailure::new(path, err)),
            }
        }

        set
    }

    fn classify(
        &self,
        path: &str,
        template: &[u8],
        projection: &Projection,
    ) -> std::io::Result<ChangeKind> {
        let source = match projection.origin(path) {
            Origin::At(source) => source,
            Origin::Vacated => return Ok(ChangeKind::New),
        };

        let current = match read(layout::resolve(self.base, &source)) {
            Ok(current) => current,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ChangeKind::New),
            Err(err) => return Err(err),
        };

        if current == template {
            return Ok(ChangeKind::Unchanged);
        }

        // INVARIANT: Hash record follows renames, so look it up at the origin.
        if self.hashes.is_verified(&source, &current) {
            return Ok(ChangeKind::AutoUpdate);
        }

        Ok(ChangeKind::NeedsConfirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use tempfile::TempDir;

    fn put(base: &Path, path: &str, content: &str) {
        let full = layout::resolve(base, path);
        create_dir_all(full.parent().unwrap()).unwrap();
        write(full, content).unwrap();
    }

    #[test]
    fn classify_all_four_kinds() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/same.md", "v2");
        put(dir.path(), ".claude/stale.md", "v1");
        hashes.update(".claude/stale.md", "v1");
        put(dir.path(), ".claude/edited.md", "v1 plus user edit");
        hashes.update(".claude/edited.md", "v1");
        put(dir.path(), ".claude/untracked.md", "something");

        let templates = TemplateSet::from_entries([
            (".claude/same.md", "v2"),
            (".claude/stale.md", "v2"),
            (".claude/edited.md", "v2"),
            (".claude/untracked.md", "v2"),
            (".claude/fresh.md", "v2"),
        ])?;

        let set = ChangeAnalyzer::new(dir.path(), &hashes).analyze(&templates, &Projection::identity());

        assert_eq!(set.failures, Vec::new());
        assert_eq!(set.kind_of(".claude/same.md"), Some(ChangeKind::Unchanged));
        assert_eq!(set.kind_of(".claude/stale.md"), Some(ChangeKind::AutoUpdate));
        assert_eq!(set.kind_of(".claude/edited.md"), Some(ChangeKind::NeedsConfirmation));
        assert_eq!(set.kind_of(".claude/untracked.md"), Some(ChangeKind::NeedsConfirmation));
        assert_eq!(set.kind_of(".claude/fresh.md"), Some(ChangeKind::New));
        assert_eq!(set.changes.len(), templates.len());

        Ok(())
    }

    #[test]
    fn content_match_wins_over_stale_hash() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/a.md", "v2");
        hashes.update(".claude/a.md", "v1");

        let templates = TemplateSet::from_entries([(".claude/a.md", "v2")])?;
        let set = ChangeAnalyzer::new(dir.path(), &hashes).analyze(&templates, &Projection::identity());

        assert_eq!(set.kind_of(".claude/a.md"), Some(ChangeKind::Unchanged));
        assert!(!set.has_writes());

        Ok(())
    }

    #[test]
    fn unreadable_path_is_reported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".claude/a.md"))?;

        let templates = TemplateSet::from_entries([(".claude/a.md", "v2")])?;
        let set = ChangeAnalyzer::new(dir.path(), &HashStore::default())
            .analyze(&templates, &Projection::identity());

        assert!(set.changes.is_empty());
        assert_eq!(set.failures.len(), 1);

        Ok(())
    }

    #[test]
    fn projection_traces_renames_back() {
        let projection = Projection::from_migrations([
            MigrationItem::rename_directory("a/b", "x/y"),
            MigrationItem::rename("x/y/one.md", "x/y/two.md"),
            MigrationItem::delete("c.md"),
        ]);

        assert_eq!(projection.origin("x/y/two.md"), Origin::At("a/b/one.md".into()));
        assert_eq!(projection.origin("x/y/sub/z.md"), Origin::At("a/b/sub/z.md".into()));
        assert_eq!(projection.origin("a/b/left.md"), Origin::Vacated);
        assert_eq!(projection.origin("c.md"), Origin::Vacated);
        assert_eq!(projection.origin("d.md"), Origin::At("d.md".into()));
    }

    #[test]
    fn analyze_against_projected_rename() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut hashes = HashStore::default();
        put(dir.path(), ".claude/old.md", "v1");
        hashes.update(".claude/old.md", "v1");

        let templates = TemplateSet::from_entries([(".claude/new.md", "v2")])?;
        let projection =
            Projection::from_migrations([MigrationItem::rename(".claude/old.md", ".claude/new.md")]);
        let set = ChangeAnalyzer::new(dir.path(), &hashes).analyze(&templates, &projection);

        assert_eq!(set.kind_of(".claude/new.md"), Some(ChangeKind::AutoUpdate));

        Ok(())
    }
}
