// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Migration risk classification.
//!
//! Every pending [`MigrationItem`] is tagged with one [`MigrationClass`] based
//! on the current state of the project on disk. Classification never mutates
//! anything, so it is safe to run in dry-run mode.
//!
//! # Rules
//!
//! Rules are checked in order, first match wins:
//!
//! 1. Source absent: __skip__, nothing to migrate.
//! 2. Source or destination is protected, is a managed root, or lies outside
//!    every managed root: __skip__.
//! 3. Destination equals source, lies inside it, or contains it: __skip__.
//! 4. Kind does not fit what is on disk, e.g., a file rename whose source is
//!    a directory: __skip__.
//! 5. Rename with live destination: __auto__ if the destination provably holds
//!    unchanged template content, otherwise __conflict__. A directory
//!    destination only counts as unchanged if _every_ file inside it does.
//! 6. Rename with free destination, or delete: __auto__ if the source is
//!    provably unmodified, otherwise __needs confirmation__.
//!
//! A path is _provably unmodified_ if its content matches the stored hash, or
//! matches the current template for that path. Anything that cannot be read
//! is never provably unmodified, and neither is anything that is not a
//! regular file, e.g., a symlink. A directory is provably unmodified only if
//! it holds nothing but provably unmodified regular files.

use crate::{
    hash::HashStore,
    layout::{self, ManagedRoots, ManagedTree},
    migration::{MigrationItem, MigrationKind},
    template::TemplateSet,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read, symlink_metadata},
    path::Path,
};
use tracing::{debug, instrument, warn};

/// Risk tag of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationClass {
    /// Provably safe, apply without asking.
    Auto,

    /// Source holds user edits, ask before applying.
    NeedsConfirmation,

    /// Source and destination are both live and divergent.
    Conflict,

    /// Nothing to do, or unsafe to touch.
    Skip,
}

impl Display for MigrationClass {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Auto => "auto",
            Self::NeedsConfirmation => "needs confirmation",
            Self::Conflict => "conflict",
            Self::Skip => "skip",
        })
    }
}

/// Migration item tagged with its risk class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMigration {
    pub item: MigrationItem,
    pub class: MigrationClass,

    /// Why the item landed in its class.
    pub reason: String,
}

impl ClassifiedMigration {
    fn new(item: &MigrationItem, class: MigrationClass, reason: impl Into<String>) -> Self {
        Self {
            item: item.clone(),
            class,
            reason: reason.into(),
        }
    }
}

impl Display for ClassifiedMigration {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({})", self.item, self.reason)
    }
}

/// What currently sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupant {
    Missing,
    File,
    Directory,
}

/// Classify pending migrations against project state.
#[derive(Debug)]
pub struct MigrationClassifier<'a> {
    base: &'a Path,
    roots: &'a ManagedRoots,
    hashes: &'a HashStore,
    templates: &'a TemplateSet,
}

impl<'a> MigrationClassifier<'a> {
    /// Construct new migration classifier.
    pub fn new(
        base: &'a Path,
        roots: &'a ManagedRoots,
        hashes: &'a HashStore,
        templates: &'a TemplateSet,
    ) -> Self {
        Self {
            base,
            roots,
            hashes,
            templates,
        }
    }

    /// Classify every item, preserving input order.
    #[instrument(skip(self, items), level = "debug")]
    pub fn classify(&self, items: &[MigrationItem]) -> Vec<ClassifiedMigration> {
        items
            .iter()
            .map(|item| {
                let classified = self.classify_item(item);
                debug!("{} => {}", classified, classified.class);
                if classified.class == MigrationClass::Conflict {
                    warn!("migration conflict: {classified}");
                }
                classified
            })
            .collect()
    }

    fn classify_item(&self, item: &MigrationItem) -> ClassifiedMigration {
        use MigrationClass::*;

        let from = item.from.as_str();
        let source = self.occupant(from);
        if source == Occupant::Missing {
            return ClassifiedMigration::new(item, Skip, "source does not exist");
        }

        if let Some(reason) = self.unsafe_path(from, source) {
            return ClassifiedMigration::new(item, Skip, format!("source {reason}"));
        }

        if item.kind == MigrationKind::Delete {
            return match self.is_unmodified(from, source) {
                true => ClassifiedMigration::new(item, Auto, "unmodified"),
                false => ClassifiedMigration::new(item, NeedsConfirmation, "modified by user"),
            };
        }

        let to = item.destination();
        let destination = self.occupant(to);
        if let Some(reason) = self.unsafe_path(to, destination) {
            return ClassifiedMigration::new(item, Skip, format!("destination {reason}"));
        }

        if layout::is_within(to, from) {
            return ClassifiedMigration::new(item, Skip, "destination lies inside source");
        }

        // INVARIANT: Clearing a destination must never take the source with it.
        if layout::is_within(from, to) {
            return ClassifiedMigration::new(item, Skip, "source lies inside destination");
        }

        match (item.kind, source) {
            (MigrationKind::Rename, Occupant::Directory) => {
                return ClassifiedMigration::new(item, Skip, "source is a directory")
            }
            (MigrationKind::RenameDirectory, Occupant::File) => {
                return ClassifiedMigration::new(item, Skip, "source is a file")
            }
            _ => {}
        }

        match destination {
            Occupant::Missing => match self.is_unmodified(from, source) {
                true => ClassifiedMigration::new(item, Auto, "unmodified"),
                false => ClassifiedMigration::new(item, NeedsConfirmation, "modified by user"),
            },
            occupant if occupant != source => ClassifiedMigration::new(
                item,
                Conflict,
                "destination exists with a different file type",
            ),
            occupant => match self.is_unmodified(to, occupant) {
                true => ClassifiedMigration::new(
                    item,
                    Auto,
                    "destination holds unchanged template content",
                ),
                false => ClassifiedMigration::new(
                    item,
                    Conflict,
                    "destination exists with divergent content",
                ),
            },
        }
    }

    fn occupant(&self, path: &str) -> Occupant {
        match symlink_metadata(layout::resolve(self.base, path)) {
            Ok(meta) if meta.is_dir() => Occupant::Directory,
            Ok(_) => Occupant::File,
            Err(_) => Occupant::Missing,
        }
    }

    fn unsafe_path(&self, path: &str, occupant: Occupant) -> Option<&'static str> {
        if self.roots.is_root(path) {
            return Some("is a managed root");
        }

        if !self.roots.is_managed(path) {
            return Some("lies outside managed roots");
        }

        if self.roots.is_protected(path) {
            return Some("is protected");
        }

        if occupant == Occupant::Directory && self.roots.contains_protected(path) {
            return Some("contains a protected path");
        }

        None
    }

    fn is_unmodified(&self, path: &str, occupant: Occupant) -> bool {
        match occupant {
            Occupant::Missing => true,
            Occupant::File => self.is_file_unmodified(path, &layout::resolve(self.base, path)),
            Occupant::Directory => {
                let tree = ManagedTree::new(self.base, self.roots.clone());
                if let Some(entry) = tree.walk_irregular(path).next() {
                    match entry {
                        Ok(entry) => debug!("cannot verify {}: not a regular file", entry.relative),
                        Err(err) => debug!("cannot verify {path}: {err}"),
                    }
                    return false;
                }

                tree.walk(path).all(|entry| match entry {
                    Ok(entry) => self.is_file_unmodified(&entry.relative, &entry.absolute),
                    Err(err) => {
                        debug!("cannot verify {path}: {err}");
                        false
                    }
                })
            }
        }
    }

    fn is_file_unmodified(&self, relative: &str, absolute: &Path) -> bool {
        if !symlink_metadata(absolute).is_ok_and(|meta| meta.is_file()) {
            debug!("cannot verify {relative}: not a regular file");
            return false;
        }

        let content = match read(absolute) {
            Ok(content) => content,
            Err(err) => {
                debug!("cannot verify {relative}: {err}");
                return false;
            }
        };

        self.templates.content(relative) == Some(content.as_slice())
            || self.hashes.is_verified(relative, &content)
    }
}
