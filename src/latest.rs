// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Advisory check for a newer published release.
//!
//! The check is best effort. It runs beside the update, never blocks it, and
//! every failure (network, timeout, malformed reply) quietly degrades to "latest
//! version unknown". Its result only changes what gets printed.

use crate::version::Version;

use serde::Deserialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};
use tracing::{debug, instrument};

/// Default time budget for the whole check.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct LatestRelease {
    version: String,
}

/// Fetch latest published version from a JSON endpoint.
///
/// Expects a document of the form `{"version": "0.3.0"}`. Returns `None` on
/// any failure.
#[instrument(level = "debug")]
pub async fn fetch_latest(url: &str, timeout: Duration) -> Option<Version> {
    match tokio::time::timeout(timeout, request(url)).await {
        Ok(Ok(version)) => {
            debug!("latest published version is {version}");
            Some(version)
        }
        Ok(Err(err)) => {
            debug!("latest version check failed: {err}");
            None
        }
        Err(_) => {
            debug!("latest version check timed out");
            None
        }
    }
}

async fn request(url: &str) -> Result<Version, LatestError> {
    let release = reqwest::Client::new()
        .get(url)
        .header(reqwest::header::USER_AGENT, concat!("tendril/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?
        .error_for_status()?
        .json::<LatestRelease>()
        .await?;

    Ok(release.version.parse()?)
}

/// What the latest published version means for the running tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// Check failed or was not performed.
    Unknown,

    /// Running tool is the latest release, or newer.
    UpToDate,

    /// A newer release exists.
    Newer(Version),
}

impl Advisory {
    /// Compare latest published version against running tool version.
    pub fn new(current: &Version, latest: Option<Version>) -> Self {
        match latest {
            None => Self::Unknown,
            Some(latest) if latest > *current => Self::Newer(latest),
            Some(_) => Self::UpToDate,
        }
    }
}

impl Display for Advisory {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unknown => fmt.write_str("latest version unknown"),
            Self::UpToDate => fmt.write_str("tendril is up to date"),
            Self::Newer(version) => write!(fmt, "tendril {version} is available"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum LatestError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Version(#[from] crate::version::VersionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn version(text: &str) -> Version {
        text.parse().unwrap()
    }

    #[test]
    fn advisory_compares_versions() {
        let current = version("0.3.0-rc.1");
        assert_eq!(Advisory::new(&current, None), Advisory::Unknown);
        assert_eq!(
            Advisory::new(&current, Some(version("0.3.0"))),
            Advisory::Newer(version("0.3.0"))
        );
        assert_eq!(Advisory::new(&current, Some(version("0.2.9"))), Advisory::UpToDate);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_none() {
        let latest = fetch_latest("http://127.0.0.1:9/latest.json", Duration::from_secs(2)).await;
        assert_eq!(latest, None);
    }
}
