// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Migration catalog.
//!
//! A __migration manifest__ describes the structural file operations needed to
//! move a project from the previous release to the release it names. The
//! __catalog__ is the ordered union of all manifests shipped with the tool.
//!
//! # Manifest Layout
//!
//! Each manifest is a TOML document:
//!
//! ```toml
//! version = "0.3.0"
//! breaking = true
//! recommend_migrate = true
//! changelog = "Commands moved under a namespace."
//! migration_guide = "Custom commands must be moved by hand."
//!
//! [[migrations]]
//! kind = "rename"
//! from = ".claude/commands/start.md"
//! to = ".claude/commands/tendril/start.md"
//!
//! [[migrations]]
//! kind = "rename-directory"
//! from = ".tendril/structure"
//! to = ".tendril/spec"
//!
//! [[migrations]]
//! kind = "delete"
//! from = ".tendril/scripts/legacy.sh"
//! ```
//!
//! # Version Ranges
//!
//! Pending migrations for an upgrade from `A` to `B` are every manifest's
//! migrations for versions in the half-open range `(A, B]`, concatenated in
//! version order. Classification and execution live in [`classify`] and
//! [`execute`].

pub mod classify;
pub mod execute;

use crate::{layout, version::Version};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_dir, read_to_string},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Kind of structural operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationKind {
    /// Move a single file.
    Rename,

    /// Move a whole directory subtree.
    #[serde(alias = "rename-dir")]
    RenameDirectory,

    /// Remove a file.
    Delete,
}

impl Display for MigrationKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Rename => "rename",
            Self::RenameDirectory => "rename-directory",
            Self::Delete => "delete",
        })
    }
}

/// Single structural operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MigrationItem {
    /// Kind of operation.
    pub kind: MigrationKind,

    /// Source path.
    pub from: String,

    /// Destination path, required for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Optional note shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MigrationItem {
    /// Construct new rename item.
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: MigrationKind::Rename,
            from: from.into(),
            to: Some(to.into()),
            description: None,
        }
    }

    /// Construct new directory rename item.
    pub fn rename_directory(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: MigrationKind::RenameDirectory,
            from: from.into(),
            to: Some(to.into()),
            description: None,
        }
    }

    /// Construct new delete item.
    pub fn delete(from: impl Into<String>) -> Self {
        Self {
            kind: MigrationKind::Delete,
            from: from.into(),
            to: None,
            description: None,
        }
    }

    /// Check if item moves content.
    pub fn is_rename(&self) -> bool {
        matches!(
            self.kind,
            MigrationKind::Rename | MigrationKind::RenameDirectory
        )
    }

    /// Destination path, or empty string for deletions.
    pub fn destination(&self) -> &str {
        self.to.as_deref().unwrap_or_default()
    }

    fn validate(mut self) -> Result<Self> {
        self.from = layout::normalize(&self.from)?;
        self.to = match (self.kind, self.to.take()) {
            (MigrationKind::Delete, _) => None,
            (_, Some(to)) => Some(layout::normalize(&to)?),
            (_, None) => return Err(CatalogError::MissingDestination { from: self.from }),
        };

        Ok(self)
    }
}

impl Display for MigrationItem {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.to {
            Some(to) => write!(fmt, "{} {} -> {}", self.kind, self.from, to),
            None => write!(fmt, "{} {}", self.kind, self.from),
        }
    }
}

/// Migrations required to reach one released version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MigrationManifest {
    /// Version this manifest migrates to.
    pub version: String,

    /// Structural operations in application order.
    #[serde(default)]
    pub migrations: Vec<MigrationItem>,

    /// Release breaks existing layouts.
    #[serde(default)]
    pub breaking: bool,

    /// Users should opt into running migrations for this release.
    #[serde(default)]
    pub recommend_migrate: bool,

    /// Short summary of what changed.
    #[serde(default)]
    pub changelog: String,

    /// Longer manual steps for users with customized files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_guide: Option<String>,
}

impl FromStr for MigrationManifest {
    type Err = CatalogError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: MigrationManifest = toml::de::from_str(data)?;
        manifest.migrations = manifest
            .migrations
            .into_iter()
            .map(MigrationItem::validate)
            .collect::<Result<Vec<_>>>()?;

        Ok(manifest)
    }
}

/// Release notes tagged with the version they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNote {
    pub version: String,
    pub text: String,
}

/// Aggregated metadata across a version range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationMetadata {
    /// Any version in range is breaking.
    pub breaking: bool,

    /// Any version in range recommends migrating.
    pub recommend_migrate: bool,

    /// Non-empty changelogs in version order.
    pub changelog: Vec<VersionNote>,

    /// Migration guides in version order.
    pub migration_guides: Vec<VersionNote>,
}

/// Ordered collection of migration manifests.
///
/// # Invariant
///
/// - Manifests are sorted by version.
/// - No two manifests share a version.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    manifests: Vec<(Version, MigrationManifest)>,
}

impl Catalog {
    /// Construct new catalog from manifests in any order.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Version`] if a manifest version is malformed.
    /// - Return [`CatalogError::Layout`] if a migration path is invalid.
    /// - Return [`CatalogError::MissingDestination`] if a rename has no
    ///   destination.
    /// - Return [`CatalogError::DuplicateVersion`] if two manifests share a
    ///   version.
    pub fn new(manifests: impl IntoIterator<Item = MigrationManifest>) -> Result<Self> {
        let mut manifests = manifests
            .into_iter()
            .map(|mut manifest| {
                // INVARIANT: Every item in a catalog is normalized and complete.
                manifest.migrations = manifest
                    .migrations
                    .into_iter()
                    .map(MigrationItem::validate)
                    .collect::<Result<Vec<_>>>()?;
                Ok((manifest.version.parse::<Version>()?, manifest))
            })
            .collect::<Result<Vec<_>>>()?;
        manifests.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        if let Some(pair) = manifests.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(CatalogError::DuplicateVersion {
                version: pair[1].1.version.clone(),
            });
        }

        Ok(Self { manifests })
    }

    /// Load every `*.toml` manifest in directory.
    ///
    /// A missing directory yields an empty catalog.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Read`] if directory or a manifest cannot be
    ///   read.
    /// - Return [`CatalogError::Manifest`] if a manifest is malformed.
    #[instrument(skip(dir), level = "debug")]
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            debug!("no migration manifests at {:?}", dir.display());
            return Ok(Self::default());
        }

        let read_error = |err, path: &Path| CatalogError::Read {
            source: err,
            path: path.to_path_buf(),
        };

        let mut paths = Vec::new();
        for entry in read_dir(dir).map_err(|err| read_error(err, dir))? {
            let path = entry.map_err(|err| read_error(err, dir))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut manifests = Vec::with_capacity(paths.len());
        for path in paths {
            let data = read_to_string(&path).map_err(|err| read_error(err, &path))?;
            let manifest = data.parse().map_err(|err| CatalogError::Manifest {
                source: Box::new(err),
                path: path.clone(),
            })?;
            manifests.push(manifest);
        }
        debug!("loaded {} migration manifests", manifests.len());

        Self::new(manifests)
    }

    /// Versions present in catalog, in ascending order.
    pub fn versions(&self) -> Vec<&str> {
        self.manifests
            .iter()
            .map(|(_, manifest)| manifest.version.as_str())
            .collect()
    }

    /// Migrations for every version in `(from, to]`, in version order.
    ///
    /// Empty when `from >= to`.
    pub fn migrations_between(&self, from: &Version, to: &Version) -> Vec<MigrationItem> {
        self.range(from, to)
            .flat_map(|manifest| manifest.migrations.iter().cloned())
            .collect()
    }

    /// Aggregate metadata for every version in `(from, to]`.
    pub fn metadata(&self, from: &Version, to: &Version) -> MigrationMetadata {
        let mut metadata = MigrationMetadata::default();
        for manifest in self.range(from, to) {
            metadata.breaking |= manifest.breaking;
            metadata.recommend_migrate |= manifest.recommend_migrate;
            if !manifest.changelog.trim().is_empty() {
                metadata.changelog.push(VersionNote {
                    version: manifest.version.clone(),
                    text: manifest.changelog.clone(),
                });
            }
            if let Some(guide) = &manifest.migration_guide {
                metadata.migration_guides.push(VersionNote {
                    version: manifest.version.clone(),
                    text: guide.clone(),
                });
            }
        }

        metadata
    }

    fn range<'a>(
        &'a self,
        from: &'a Version,
        to: &'a Version,
    ) -> impl Iterator<Item = &'a MigrationManifest> + 'a {
        self.manifests
            .iter()
            .filter(move |(version, _)| version > from && version <= to)
            .map(|(_, manifest)| manifest)
    }
}

/// Migration catalog error types.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Manifest document cannot be deserialized.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Manifest file is malformed.
    #[error("invalid migration manifest {:?}", path.display())]
    Manifest {
        #[source]
        source: Box<CatalogError>,
        path: PathBuf,
    },

    /// Manifest directory or file cannot be read.
    #[error("failed to read migration manifests at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest version is malformed.
    #[error(transparent)]
    Version(#[from] crate::version::VersionError),

    /// Migration path is not a valid managed path.
    #[error(transparent)]
    Layout(#[from] crate::layout::LayoutError),

    /// Rename lacks a destination.
    #[error("rename of {from:?} has no destination")]
    MissingDestination { from: String },

    /// Two manifests claim the same version.
    #[error("duplicate migration manifest for version {version}")]
    DuplicateVersion { version: String },
}

/// Friendly result alias :3
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn manifest(version: &str, migrations: Vec<MigrationItem>) -> MigrationManifest {
        MigrationManifest {
            version: version.into(),
            migrations,
            breaking: false,
            recommend_migrate: false,
            changelog: format!("changes in {version}"),
            migration_guide: None,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new([
            manifest("0.3.0", vec![MigrationItem::delete("c.md")]),
            manifest("0.2.0", vec![MigrationItem::rename("a.md", "b.md")]),
            manifest("0.3.0-beta.2", vec![MigrationItem::rename_directory("x", "y")]),
        ])
        .unwrap()
    }

    fn version(text: &str) -> Version {
        text.parse().unwrap()
    }

    #[test]
    fn deserialize_manifest() -> anyhow::Result<()> {
        let result: MigrationManifest = indoc! {r#"
            version = "0.3.0"
            breaking = true
            recommend_migrate = true
            changelog = "Commands moved."

            [[migrations]]
            kind = "rename"
            from = "./.claude/commands/start.md"
            to = ".claude/commands/tendril/start.md"

            [[migrations]]
            kind = "rename-dir"
            from = ".tendril/structure/"
            to = ".tendril/spec"
            description = "structure became spec"

            [[migrations]]
            kind = "delete"
            from = ".tendril/scripts/legacy.sh"
        "#}
        .parse()?;

        let mut renamed = MigrationItem::rename_directory(".tendril/structure", ".tendril/spec");
        renamed.description = Some("structure became spec".into());
        let expect = MigrationManifest {
            version: "0.3.0".into(),
            migrations: vec![
                MigrationItem::rename(
                    ".claude/commands/start.md",
                    ".claude/commands/tendril/start.md",
                ),
                renamed,
                MigrationItem::delete(".tendril/scripts/legacy.sh"),
            ],
            breaking: true,
            recommend_migrate: true,
            changelog: "Commands moved.".into(),
            migration_guide: None,
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn reject_rename_without_destination() {
        let result = indoc! {r#"
            version = "0.3.0"

            [[migrations]]
            kind = "rename"
            from = "a.md"
        "#}
        .parse::<MigrationManifest>();

        assert!(matches!(result, Err(CatalogError::MissingDestination { .. })));
    }

    #[test]
    fn versions_are_sorted() {
        assert_eq!(catalog().versions(), vec!["0.2.0", "0.3.0-beta.2", "0.3.0"]);
    }

    #[test]
    fn migrations_between_is_half_open() {
        let catalog = catalog();

        assert_eq!(
            catalog.migrations_between(&version("0.2.0"), &version("0.3.0")),
            vec![
                MigrationItem::rename_directory("x", "y"),
                MigrationItem::delete("c.md"),
            ]
        );
        assert_eq!(
            catalog.migrations_between(&version("0.1.0"), &version("0.3.0-beta.2")),
            vec![
                MigrationItem::rename("a.md", "b.md"),
                MigrationItem::rename_directory("x", "y"),
            ]
        );
        assert!(catalog
            .migrations_between(&version("0.3.0"), &version("0.3.0"))
            .is_empty());
        assert!(catalog
            .migrations_between(&version("0.3.0"), &version("0.2.0"))
            .is_empty());
    }

    #[test]
    fn metadata_aggregates_range() {
        let mut breaking = manifest("0.3.0", Vec::new());
        breaking.breaking = true;
        breaking.migration_guide = Some("move custom commands".into());
        let mut quiet = manifest("0.2.0", Vec::new());
        quiet.recommend_migrate = true;
        quiet.changelog = String::new();
        let catalog = Catalog::new([breaking, quiet]).unwrap();

        let metadata = catalog.metadata(&version("0.1.0"), &version("0.3.0"));

        assert!(metadata.breaking);
        assert!(metadata.recommend_migrate);
        assert_eq!(
            metadata.changelog,
            vec![VersionNote {
                version: "0.3.0".into(),
                text: "changes in 0.3.0".into()
            }]
        );
        assert_eq!(metadata.migration_guides.len(), 1);
        assert_eq!(
            catalog.metadata(&version("0.2.0"), &version("0.2.0")),
            MigrationMetadata::default()
        );
    }

    #[test]
    fn catalog_validates_items_built_in_code() -> anyhow::Result<()> {
        let catalog = Catalog::new([manifest(
            "0.2.0",
            vec![MigrationItem::rename("./.claude//old.md", ".claude/new.md/")],
        )])?;
        assert_eq!(
            catalog.migrations_between(&version("0.1.0"), &version("0.2.0")),
            vec![MigrationItem::rename(".claude/old.md", ".claude/new.md")]
        );

        let escaping = Catalog::new([manifest("0.2.0", vec![MigrationItem::delete("../outside.md")])]);
        assert!(matches!(escaping, Err(CatalogError::Layout(..))));

        let incomplete = MigrationItem {
            to: None,
            ..MigrationItem::rename(".claude/a.md", ".claude/b.md")
        };
        let result = Catalog::new([manifest("0.2.0", vec![incomplete])]);
        assert!(matches!(result, Err(CatalogError::MissingDestination { .. })));

        Ok(())
    }

    #[test]
    fn reject_duplicate_versions() {
        let result = Catalog::new([manifest("1.0", Vec::new()), manifest("1.0.0", Vec::new())]);
        assert!(matches!(result, Err(CatalogError::DuplicateVersion { .. })));
    }
}
