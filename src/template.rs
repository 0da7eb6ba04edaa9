// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template set representation.
//!
//! A __template__ is the canonical content the current release wants at a
//! managed path. Which templates apply to a project depends on which tools
//! the project uses, but the engine does not care how the set was assembled.
//! It only sees an ordered `relative path -> bytes` map that stays immutable
//! for the duration of one run.

use crate::layout::{self, ManagedRoots, ManagedTree};

use std::{
    collections::{btree_map::Values, BTreeMap},
    fs::read,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Canonical content for one managed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    path: String,
    content: Vec<u8>,
}

impl TemplateEntry {
    /// Construct new template entry.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError::Layout`] if path is not a valid relative path.
    pub fn new(path: impl AsRef<str>, content: impl Into<Vec<u8>>) -> Result<Self> {
        Ok(Self {
            path: layout::normalize(path.as_ref())?,
            content: content.into(),
        })
    }

    /// Normalized project relative path.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// Raw template content.
    pub fn content(&self) -> &[u8] {
        self.content.as_slice()
    }
}

/// Ordered collection of template entries keyed by relative path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    entries: BTreeMap<String, TemplateEntry>,
}

impl TemplateSet {
    /// Construct new empty template set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct template set from path and content pairs.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError::Layout`] if any path is invalid.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>,
    ) -> Result<Self> {
        let mut set = Self::new();
        for (path, content) in entries {
            set.insert(TemplateEntry::new(path, content)?);
        }

        Ok(set)
    }

    /// Load template set from directory mirroring project layout.
    ///
    /// Every regular file beneath `dir` becomes a template whose relative path
    /// is its path relative to `dir`.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError::Layout`] if directory cannot be walked.
    /// - Return [`TemplateError::Read`] if a template file cannot be read.
    #[instrument(skip(dir), level = "debug")]
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(TemplateError::MissingDir(dir.to_path_buf()));
        }

        let tree = ManagedTree::new(dir, ManagedRoots::default());
        let mut set = Self::new();
        for entry in tree.walk("") {
            let entry = entry?;
            let content = read(&entry.absolute).map_err(|err| TemplateError::Read {
                source: err,
                path: entry.absolute.clone(),
            })?;
            set.insert(TemplateEntry::new(&entry.relative, content)?);
        }
        debug!("loaded {} templates from {:?}", set.len(), dir.display());

        Ok(set)
    }

    /// Insert entry, replacing any previous entry at the same path.
    pub fn insert(&mut self, entry: TemplateEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Lookup entry by relative path.
    pub fn get(&self, path: &str) -> Option<&TemplateEntry> {
        self.entries.get(path)
    }

    /// Lookup template content by relative path.
    pub fn content(&self, path: &str) -> Option<&[u8]> {
        self.get(path).map(TemplateEntry::content)
    }

    /// Iterate through entries in path order.
    pub fn iter(&self) -> Values<'_, String, TemplateEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level component of every entry path, in path order.
    pub fn top_level(&self) -> impl Iterator<Item = String> + '_ {
        self.entries
            .keys()
            .map(|path| path.split('/').next().unwrap_or(path).to_string())
    }
}

impl<'a> IntoIterator for &'a TemplateSet {
    type Item = &'a TemplateEntry;
    type IntoIter = Values<'a, String, TemplateEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Template loading error types.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Template directory does not exist.
    #[error("template directory {:?} does not exist", .0.display())]
    MissingDir(PathBuf),

    /// Template file cannot be read.
    #[error("failed to read template {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Template path is invalid, or directory walk fails.
    #[error(transparent)]
    Layout(#[from] crate::layout::LayoutError),
}

/// Friendly result alias :3
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use tempfile::TempDir;

    #[test]
    fn load_templates_from_dir() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        create_dir_all(dir.path().join(".claude/commands"))?;
        write(dir.path().join(".claude/commands/start.md"), "start")?;
        write(dir.path().join("AGENTS.md"), "agents")?;

        let set = TemplateSet::from_dir(dir.path())?;

        assert_eq!(
            set.iter().map(TemplateEntry::path).collect::<Vec<_>>(),
            vec![".claude/commands/start.md", "AGENTS.md"]
        );
        assert_eq!(set.content("AGENTS.md"), Some(b"agents".as_slice()));

        Ok(())
    }

    #[test]
    fn reject_escaping_template_paths() {
        assert!(TemplateEntry::new("../outside.md", "x").is_err());
        assert!(TemplateEntry::new("/abs.md", "x").is_err());
    }

    #[test]
    fn normalize_template_paths() -> anyhow::Result<()> {
        let set = TemplateSet::from_entries([("./.claude\\hooks/run.py", "print()")])?;
        assert!(set.get(".claude/hooks/run.py").is_some());
        Ok(())
    }
}
