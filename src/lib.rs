// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template synchronization engine.
//!
//! Tendril keeps a project directory in step with an evolving set of
//! configuration templates without clobbering the edits a user made to them.
//! Every file the engine writes has its content hash recorded, so a later run
//! can tell "the template moved on" apart from "the user touched this file".
//!
//! Structural changes between releases, i.e., renames, directory renames, and
//! deletions, are described by version keyed migration manifests. The update
//! engine classifies each pending migration and each template file by risk,
//! applies what is provably safe, and hands everything else to a
//! [`DecisionProvider`](crate::resolve::DecisionProvider). A full snapshot of
//! the managed files is taken before anything on disk is touched.
//!
//! # Concurrency
//!
//! The hash record and version marker are plain files without any locking.
//! Running two updates against the same project at once is unsupported, and
//! callers are responsible for preventing it.

pub mod analyze;
pub mod backup;
pub mod config;
pub mod hash;
pub mod latest;
pub mod layout;
pub mod migration;
pub mod resolve;
pub mod template;
pub mod update;
pub mod version;

pub use crate::{
    config::Settings,
    hash::HashStore,
    layout::{ManagedRoots, ProjectLayout},
    migration::Catalog,
    resolve::{ConsolePrompter, DecisionProvider, ScriptedDecisions, WriteMode},
    template::TemplateSet,
    update::{Outcome, UpdateOptions, UpdateReport, Updater},
    version::Version,
};

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Failure isolated to a single file or migration item.
///
/// Per-item failures never abort a batch. They are collected and surfaced in
/// the final report instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Project relative path of the item that failed.
    pub path: String,

    /// Human readable cause.
    pub reason: String,
}

impl ItemFailure {
    /// Construct new item failure.
    pub fn new(path: impl Into<String>, reason: impl Display) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl Display for ItemFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.path, self.reason)
    }
}
