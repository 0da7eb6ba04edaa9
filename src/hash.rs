// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hash record management.
//!
//! The __hash record__ remembers what the engine last wrote at each managed
//! path, as a SHA-256 digest of the raw bytes. It is the only thing that lets
//! the engine tell a file the user edited apart from a file whose template
//! simply moved on.
//!
//! # Record Semantics
//!
//! A key in the record means "the engine wrote this content here". The absence
//! of a key means _untracked_, which is not the same thing as _unmodified_: an
//! untracked file cannot be proven to hold template content, so it is treated
//! as modified by convention.
//!
//! # Persistence
//!
//! The record is stored as a flat, pretty printed JSON object with sorted keys,
//! so the same record always serializes to the same bytes. A missing or
//! corrupt record degrades to an empty one rather than failing the run.

use crate::layout::is_within;

use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fs::{read_to_string, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Compute content hash of raw bytes.
///
/// Lowercase hex encoded SHA-256, stable across runs and platforms.
pub fn content_hash(content: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(content.as_ref()))
}

/// Persistent mapping of managed path to content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashStore {
    path: PathBuf,
    records: BTreeMap<String, String>,
    dirty: bool,
}

impl HashStore {
    /// Construct new empty hash store persisted at target path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load hash store from target path.
    ///
    /// Missing, unreadable, or malformed records yield an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<BTreeMap<String, String>>(&data) {
                Ok(records) => records,
                Err(err) => {
                    warn!("ignoring corrupt hash record {:?}: {err}", path.display());
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no hash record at {:?}", path.display());
                BTreeMap::new()
            }
            Err(err) => {
                warn!("ignoring unreadable hash record {:?}: {err}", path.display());
                BTreeMap::new()
            }
        };

        Self {
            path,
            records,
            dirty: false,
        }
    }

    /// Persist hash store to its path.
    ///
    /// Writes to a sibling temporary file first, then renames it into place.
    ///
    /// # Errors
    ///
    /// - Return [`HashError::Serialize`] if record cannot be serialized.
    /// - Return [`HashError::Write`] if record cannot be written.
    pub fn save(&mut self) -> Result<()> {
        let mut data = serde_json::to_string_pretty(&self.records)?;
        data.push('\n');

        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| HashError::Write {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        let staging = self.path.with_extension("json.tmp");
        write(&staging, data).map_err(|err| HashError::Write {
            source: err,
            path: staging.clone(),
        })?;
        rename(&staging, &self.path).map_err(|err| HashError::Write {
            source: err,
            path: self.path.clone(),
        })?;
        self.dirty = false;

        Ok(())
    }

    /// Path the store persists to.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Check if store changed since it was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stored hash for path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.records.get(path).map(String::as_str)
    }

    /// Iterate through records in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records
            .iter()
            .map(|(path, hash)| (path.as_str(), hash.as_str()))
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no path is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record hash of content written at path.
    pub fn update(&mut self, path: impl Into<String>, content: impl AsRef<[u8]>) {
        let hash = content_hash(content);
        let path = path.into();
        if self.records.get(&path) != Some(&hash) {
            self.records.insert(path, hash);
            self.dirty = true;
        }
    }

    /// Forget path, and every path beneath it when it names a directory.
    pub fn remove(&mut self, path: &str) {
        let before = self.records.len();
        self.records.retain(|key, _| !is_within(key, path));
        if self.records.len() != before {
            self.dirty = true;
        }
    }

    /// Move records from `old` to `new`.
    ///
    /// Handles both file and directory renames: an exact entry for `old` moves
    /// to `new`, and every entry beneath `old/` is remapped beneath `new/`. Any
    /// entry already at or beneath `new` is dropped first, because whatever it
    /// described is being overwritten by the move.
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        // INVARIANT: Drop stale records at destination before remapping.
        self.records
            .retain(|key, _| !is_within(key, new) || is_within(key, old));
        self.merge(old, new);
    }

    /// Move records from `old` to `new`, keeping records already beneath `new`.
    ///
    /// Only records that collide with a moved record are replaced. Used when
    /// a directory is merged into a destination that already holds tracked
    /// files.
    pub fn merge(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        let moved = self
            .records
            .iter()
            .filter(|(key, _)| is_within(key, old))
            .map(|(key, hash)| (format!("{new}{}", &key[old.len()..]), hash.clone()))
            .collect::<Vec<_>>();

        self.records.retain(|key, _| !is_within(key, old));
        self.records.extend(moved);
        self.dirty = true;
    }

    /// Check if content at path may have been modified by the user.
    ///
    /// True if the stored hash differs from the hash of `content`, and also
    /// true when no hash is stored, since untracked content cannot be proven
    /// unmodified.
    pub fn is_modified(&self, path: &str, content: impl AsRef<[u8]>) -> bool {
        !self.is_verified(path, content)
    }

    /// Check if stored hash exists and matches hash of `content`.
    pub fn is_verified(&self, path: &str, content: impl AsRef<[u8]>) -> bool {
        self.get(path)
            .is_some_and(|hash| hash == content_hash(content))
    }
}

/// Hash record error types.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Record cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Record cannot be written.
    #[error("failed to write hash record {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = HashError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash("abc"), content_hash(b"abc".to_vec()));
    }

    #[test]
    fn untracked_path_counts_as_modified() {
        let mut store = HashStore::default();
        assert!(store.is_modified("a.md", "hello"));

        store.update("a.md", "hello");
        assert!(!store.is_modified("a.md", "hello"));
        assert!(store.is_modified("a.md", "hello, world"));
    }

    #[test]
    fn rename_file_entry() {
        let mut store = HashStore::default();
        store.update(".claude/old.md", "one");
        store.update(".claude/new.md", "stale");

        store.rename(".claude/old.md", ".claude/new.md");

        assert_eq!(store.get(".claude/old.md"), None);
        assert_eq!(store.get(".claude/new.md"), Some(content_hash("one").as_str()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rename_directory_remaps_prefix_and_drops_stale() {
        let mut store = HashStore::default();
        store.update("a/b/one.md", "1");
        store.update("a/b/sub/two.md", "2");
        store.update("a/bee.md", "3");
        store.update("x/y/stale.md", "4");

        store.rename("a/b", "x/y");

        assert_eq!(
            store.iter().map(|(path, _)| path).collect::<Vec<_>>(),
            vec!["a/bee.md", "x/y/one.md", "x/y/sub/two.md"]
        );
        assert_eq!(store.get("x/y/one.md"), Some(content_hash("1").as_str()));
    }

    #[test]
    fn merge_keeps_existing_destination_records() {
        let mut store = HashStore::default();
        store.update("x/y/z/deep.md", "deep");
        store.update("x/y/top.md", "old top");
        store.update("a/b/top.md", "top");

        store.merge("a/b", "x/y");

        assert_eq!(
            store.iter().map(|(path, _)| path).collect::<Vec<_>>(),
            vec!["x/y/top.md", "x/y/z/deep.md"]
        );
        assert_eq!(store.get("x/y/top.md"), Some(content_hash("top").as_str()));
    }

    #[test]
    fn remove_directory_prefix() {
        let mut store = HashStore::default();
        store.update("a/one.md", "1");
        store.update("a/two/three.md", "3");
        store.update("ab.md", "x");

        store.remove("a");

        assert_eq!(store.iter().map(|(path, _)| path).collect::<Vec<_>>(), vec!["ab.md"]);
    }

    #[test]
    fn save_then_load_is_stable() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state/.template-hashes.json");
        let mut store = HashStore::new(&path);
        store.update("b.md", "b");
        store.update("a.md", "a");
        assert!(store.is_dirty());
        store.save()?;
        assert!(!store.is_dirty());

        let first = std::fs::read_to_string(&path)?;
        let mut loaded = HashStore::load(&path);
        assert_eq!(loaded.iter().collect::<Vec<_>>(), store.iter().collect::<Vec<_>>());
        loaded.save()?;
        assert_eq!(std::fs::read_to_string(&path)?, first);

        let expect = format!(
            "{{\n  \"a.md\": \"{}\",\n  \"b.md\": \"{}\"\n}}\n",
            content_hash("a"),
            content_hash("b")
        );
        assert_eq!(first, expect);

        Ok(())
    }

    #[test]
    fn corrupt_record_degrades_to_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(".template-hashes.json");
        std::fs::write(
            &path,
            indoc! {r#"
                { "a.md": "deadbeef",
            "#},
        )?;

        let store = HashStore::load(&path);
        assert!(store.is_empty());
        assert!(HashStore::load(dir.path().join("missing.json")).is_empty());

        Ok(())
    }
}
