// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version ordering and the installed version marker.
//!
//! Versions are a dotted numeric base with an optional dot separated
//! prerelease suffix, e.g., `0.3.0-beta.10`. Ordering follows semantic
//! versioning precedence with one relaxation: missing trailing base components
//! count as zero, so `1.2` and `1.2.0` are the same version.
//!
//! # Prerelease Precedence
//!
//! - A release sorts after every prerelease of the same base.
//! - Identifiers compare pairwise. Numeric identifiers compare numerically, and
//!   always sort before alphanumeric ones.
//! - A shorter prerelease sorts before a longer one sharing its prefix.
//!
//! Thus `beta.2 < beta.10 < rc.0 < 1.0.0`.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

/// Parsed version string.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    base: Vec<u64>,
    prerelease: Vec<Identifier>,
}

/// Single prerelease identifier.
///
/// Variant order matters: derived ordering puts numeric identifiers before
/// alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Identifier {
    Numeric(u64),
    Alphanumeric(String),
}

impl Version {
    /// Original text the version was parsed from, trimmed.
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Check if version carries a prerelease suffix.
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let raw = data.trim();
        let invalid = |reason| VersionError::Invalid {
            version: raw.to_string(),
            reason,
        };

        let text = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
        // INVARIANT: Build metadata never takes part in ordering.
        let text = text.split_once('+').map_or(text, |(text, _)| text);
        let (base, prerelease) = match text.split_once('-') {
            Some((base, prerelease)) => (base, Some(prerelease)),
            None => (text, None),
        };

        if base.is_empty() {
            return Err(invalid("missing numeric base"));
        }

        let base = base
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
                    return Err(invalid("base components must be numeric"));
                }
                part.parse::<u64>()
                    .map_err(|_| invalid("base component out of range"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let prerelease = match prerelease {
            None => Vec::new(),
            Some(prerelease) => prerelease
                .split('.')
                .map(|part| {
                    if part.is_empty() {
                        return Err(invalid("empty prerelease identifier"));
                    }
                    if part.bytes().all(|byte| byte.is_ascii_digit()) {
                        part.parse::<u64>()
                            .map(Identifier::Numeric)
                            .map_err(|_| invalid("prerelease identifier out of range"))
                    } else {
                        Ok(Identifier::Alphanumeric(part.to_string()))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Self {
            raw: raw.to_string(),
            base,
            prerelease,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.base.len().max(other.base.len());
        for index in 0..width {
            let lhs = self.base.get(index).copied().unwrap_or(0);
            let rhs = other.base.get(index).copied().unwrap_or(0);
            match lhs.cmp(&rhs) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }

        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.prerelease.cmp(&other.prerelease),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.raw)
    }
}

/// Compare two version strings.
///
/// # Errors
///
/// - Return [`VersionError::Invalid`] if either version fails to parse.
pub fn compare(lhs: &str, rhs: &str) -> Result<Ordering> {
    Ok(lhs.parse::<Version>()?.cmp(&rhs.parse::<Version>()?))
}

/// File recording the version whose templates were last applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    /// Construct new version marker at target path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Read installed version.
    ///
    /// Returns `None` for an unknown version: the marker is missing, empty,
    /// or holds something that does not parse as a version.
    ///
    /// # Errors
    ///
    /// - Return [`VersionError::Read`] if marker exists but cannot be read.
    pub fn read(&self) -> Result<Option<Version>> {
        let data = match read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(VersionError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        };

        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }

        match data.parse::<Version>() {
            Ok(version) => Ok(Some(version)),
            Err(err) => {
                warn!("treating installed version as unknown: {err}");
                Ok(None)
            }
        }
    }

    /// Record installed version.
    ///
    /// # Errors
    ///
    /// - Return [`VersionError::Write`] if marker cannot be written.
    pub fn write(&self, version: &Version) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| VersionError::Write {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        write(&self.path, format!("{version}\n")).map_err(|err| VersionError::Write {
            source: err,
            path: self.path.clone(),
        })
    }
}

/// Version error types.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// Version string is malformed.
    #[error("invalid version {version:?}: {reason}")]
    Invalid {
        version: String,
        reason: &'static str,
    },

    /// Version marker cannot be read.
    #[error("failed to read version marker {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Version marker cannot be written.
    #[error("failed to write version marker {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = VersionError> = std::result::Result<T, E>;
