// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the project settings file that Tendril reads to learn
//! which directories it owns and where its release bundle lives. Parsing and
//! rendering go through [`FromStr`] and [`Display`], while [`Settings::load`]
//! handles the one bit of file I/O needed to find the file on disk.

use crate::{
    layout::{self, ManagedRoots},
    template::TemplateSet,
};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Project settings layout.
///
/// Every field is optional in the settings file. Missing fields fall back to
/// the defaults of [`Settings::default`].
///
/// # General Layout
///
/// ```toml
/// state_dir = ".tendril"
/// managed_roots = [".tendril", ".claude"]
/// protected = [".tendril/workspace", ".tendril/tasks"]
/// backup_exclude = ["**/.backup-*", "**/*.tmp"]
/// executable_extensions = ["sh", "py"]
/// templates = "~/.local/share/tendril/templates"
/// migrations = "$TENDRIL_HOME/migrations"
/// latest_version_url = "https://example.org/tendril/latest.json"
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Directory for hash record, version marker, and backups.
    pub state_dir: String,

    /// Top-level directories owned by the engine.
    ///
    /// Derived from the template set when left empty.
    pub managed_roots: Vec<String>,

    /// Subtrees holding user data that are never touched.
    ///
    /// Defaults to `workspace` and `tasks` inside the state directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected: Option<Vec<String>>,

    /// Glob patterns excluded from backups.
    pub backup_exclude: Vec<String>,

    /// File extensions that get the executable bit when written or renamed.
    pub executable_extensions: Vec<String>,

    /// Directory holding the shipped template set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates: Option<PathBuf>,

    /// Directory holding per-version migration manifests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations: Option<PathBuf>,

    /// URL of a JSON document advertising the latest published version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: ".tendril".into(),
            managed_roots: Vec::new(),
            protected: None,
            backup_exclude: vec!["**/.backup-*".into(), "**/*.tmp".into()],
            executable_extensions: vec!["sh".into(), "py".into()],
            templates: None,
            migrations: None,
            latest_version_url: None,
        }
    }
}

impl Settings {
    /// Load settings file at target path.
    ///
    /// A missing settings file is not an error, and simply yields the default
    /// settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no settings file at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Protected paths with state directory defaults applied.
    pub fn protected_paths(&self) -> Vec<String> {
        match &self.protected {
            Some(paths) => paths.clone(),
            None => vec![
                format!("{}/workspace", self.state_dir),
                format!("{}/tasks", self.state_dir),
            ],
        }
    }

    /// Build managed root set for given template set.
    ///
    /// If no managed roots were configured, then every top-level component of
    /// the template set becomes a managed root, alongside the state directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Layout`] if any configured path is invalid.
    pub fn managed_roots(&self, templates: &TemplateSet) -> Result<ManagedRoots> {
        let mut roots = self.managed_roots.iter().cloned().collect::<BTreeSet<_>>();
        if roots.is_empty() {
            roots.extend(templates.top_level());
            roots.insert(layout::normalize(&self.state_dir)?);
        }

        Ok(ManagedRoots::new(roots, self.protected_paths())?)
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on release bundle paths.
        settings.templates = settings.templates.map(expand_path).transpose()?;
        settings.migrations = settings.migrations.map(expand_path).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file cannot be read.
    #[error("failed to read settings file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configured path is not a valid managed path.
    #[error(transparent)]
    Layout(#[from] crate::layout::LayoutError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
