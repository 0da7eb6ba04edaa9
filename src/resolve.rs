// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Conflict resolution.
//!
//! Turn a file or migration that needs confirmation into a concrete action.
//! The [`ConflictResolver`] applies the run's [`WriteMode`] first, then any
//! sticky "apply to all remaining" choice, and only then asks a
//! [`DecisionProvider`].
//!
//! # Providers
//!
//! - [`ConsolePrompter`]: interactive terminal prompts through `inquire`.
//! - [`ScriptedDecisions`]: canned answers, for tests and automation.

use crate::{migration::classify::ClassifiedMigration, update::UpdatePlan};

use indicatif::ProgressBar;
use inquire::{Confirm, Select};
use std::{
    collections::VecDeque,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, info, instrument};

/// How conflicts are settled for a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Ask the decision provider.
    #[default]
    Ask,

    /// Overwrite user edits, backing up before migrating.
    Overwrite,

    /// Keep user edits, skip migrations that need confirmation.
    Skip,

    /// Write templates next to user edits, skip migrations that need
    /// confirmation.
    CreateNew,
}

impl WriteMode {
    /// Check if mode settles every conflict without asking.
    pub fn is_unattended(&self) -> bool {
        !matches!(self, Self::Ask)
    }

    /// Check if mode can let a migration that needs confirmation through.
    pub fn applies_migrations(&self) -> bool {
        matches!(self, Self::Ask | Self::Overwrite)
    }
}

impl Display for WriteMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Ask => "ask",
            Self::Overwrite => "force",
            Self::Skip => "skip-all",
            Self::CreateNew => "create-new",
        })
    }
}

/// Resolution of a file that needs confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Replace user content with template content.
    Overwrite,

    /// Leave user content alone.
    Skip,

    /// Write template content to a sibling path, see [`sibling_path`].
    CreateSiblingCopy,
}

/// Resolution of a migration that needs confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// Apply migration as is.
    RenameAnyway,

    /// Apply migration once a backup is guaranteed to exist.
    BackupThenRename,

    /// Leave source in place.
    Skip,
}

impl MigrationAction {
    /// Check if action applies the migration.
    pub fn applies(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Action chosen by a provider, optionally sticky for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision<A> {
    pub action: A,
    pub apply_to_all: bool,
}

impl<A> Decision<A> {
    /// Decision for this item only.
    pub fn once(action: A) -> Self {
        Self {
            action,
            apply_to_all: false,
        }
    }

    /// Decision for this and every remaining item.
    pub fn for_all(action: A) -> Self {
        Self {
            action,
            apply_to_all: true,
        }
    }
}

/// File whose user edits collide with a template change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileConflict<'a> {
    pub path: &'a str,
    pub current: &'a [u8],
    pub template: &'a [u8],
}

/// Source of decisions for items that need confirmation.
pub trait DecisionProvider {
    /// Decide what to do with a modified file.
    fn resolve_file(&mut self, conflict: &FileConflict<'_>) -> Result<Decision<FileAction>>;

    /// Decide what to do with a migration of modified content.
    fn resolve_migration(
        &mut self,
        migration: &ClassifiedMigration,
    ) -> Result<Decision<MigrationAction>>;

    /// Confirm presented plan before anything is touched.
    fn confirm_plan(&mut self, plan: &UpdatePlan) -> Result<bool>;
}

/// Sibling path that receives template content next to a user edit.
pub fn sibling_path(path: &str) -> String {
    format!("{path}.new")
}

/// Settle items that need confirmation for one run.
///
/// # Invariant
///
/// Once a sticky choice is recorded, the provider is never consulted again
/// for that item type during the run.
pub struct ConflictResolver<'a> {
    mode: WriteMode,
    provider: &'a mut dyn DecisionProvider,
    sticky_file: Option<FileAction>,
    sticky_migration: Option<MigrationAction>,
}

impl<'a> ConflictResolver<'a> {
    /// Construct new conflict resolver.
    pub fn new(mode: WriteMode, provider: &'a mut dyn DecisionProvider) -> Self {
        Self {
            mode,
            provider,
            sticky_file: None,
            sticky_migration: None,
        }
    }

    /// Resolve file that needs confirmation.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError`] if decision provider fails.
    #[instrument(skip(self, conflict), level = "debug")]
    pub fn resolve_file(&mut self, conflict: &FileConflict<'_>) -> Result<FileAction> {
        let action = match self.mode {
            WriteMode::Overwrite => FileAction::Overwrite,
            WriteMode::Skip => FileAction::Skip,
            WriteMode::CreateNew => FileAction::CreateSiblingCopy,
            WriteMode::Ask => match self.sticky_file {
                Some(action) => action,
                None => {
                    let decision = self.provider.resolve_file(conflict)?;
                    if decision.apply_to_all {
                        info!("applying {:?} to all remaining files", decision.action);
                        self.sticky_file = Some(decision.action);
                    }
                    decision.action
                }
            },
        };
        debug!("{} => {action:?}", conflict.path);

        Ok(action)
    }

    /// Resolve migration that needs confirmation.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError`] if decision provider fails.
    #[instrument(skip(self, migration), level = "debug")]
    pub fn resolve_migration(&mut self, migration: &ClassifiedMigration) -> Result<MigrationAction> {
        let action = match self.mode {
            WriteMode::Overwrite => MigrationAction::BackupThenRename,
            WriteMode::Skip | WriteMode::CreateNew => MigrationAction::Skip,
            WriteMode::Ask => match self.sticky_migration {
                Some(action) => action,
                None => {
                    let decision = self.provider.resolve_migration(migration)?;
                    if decision.apply_to_all {
                        info!("applying {:?} to all remaining migrations", decision.action);
                        self.sticky_migration = Some(decision.action);
                    }
                    decision.action
                }
            },
        };
        debug!("{} => {action:?}", migration.item);

        Ok(action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileChoice {
    Overwrite,
    Skip,
    CreateNew,
    OverwriteAll,
    SkipAll,
    CreateNewAll,
}

impl FileChoice {
    const ALL: [FileChoice; 6] = [
        Self::Skip,
        Self::Overwrite,
        Self::CreateNew,
        Self::SkipAll,
        Self::OverwriteAll,
        Self::CreateNewAll,
    ];

    fn into_decision(self) -> Decision<FileAction> {
        match self {
            Self::Overwrite => Decision::once(FileAction::Overwrite),
            Self::Skip => Decision::once(FileAction::Skip),
            Self::CreateNew => Decision::once(FileAction::CreateSiblingCopy),
            Self::OverwriteAll => Decision::for_all(FileAction::Overwrite),
            Self::SkipAll => Decision::for_all(FileAction::Skip),
            Self::CreateNewAll => Decision::for_all(FileAction::CreateSiblingCopy),
        }
    }
}

impl Display for FileChoice {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Overwrite => "overwrite with template",
            Self::Skip => "keep my version",
            Self::CreateNew => "write template to .new copy",
            Self::OverwriteAll => "overwrite all remaining",
            Self::SkipAll => "keep all remaining",
            Self::CreateNewAll => "write .new copies for all remaining",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MigrationChoice {
    Rename,
    BackupThenRename,
    Skip,
    RenameAll,
    SkipAll,
}

impl MigrationChoice {
    const ALL: [MigrationChoice; 5] = [
        Self::BackupThenRename,
        Self::Rename,
        Self::Skip,
        Self::RenameAll,
        Self::SkipAll,
    ];

    fn into_decision(self) -> Decision<MigrationAction> {
        match self {
            Self::Rename => Decision::once(MigrationAction::RenameAnyway),
            Self::BackupThenRename => Decision::once(MigrationAction::BackupThenRename),
            Self::Skip => Decision::once(MigrationAction::Skip),
            Self::RenameAll => Decision::for_all(MigrationAction::BackupThenRename),
            Self::SkipAll => Decision::for_all(MigrationAction::Skip),
        }
    }
}

impl Display for MigrationChoice {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Rename => "migrate anyway",
            Self::BackupThenRename => "back up, then migrate",
            Self::Skip => "leave in place",
            Self::RenameAll => "migrate all remaining",
            Self::SkipAll => "leave all remaining in place",
        })
    }
}

/// Interactive decision provider for terminals.
///
/// Any progress bar handed in is suspended while a prompt is on screen.
#[derive(Debug, Clone)]
pub struct ConsolePrompter {
    bar: ProgressBar,
}

impl ConsolePrompter {
    /// Construct new console prompter.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new(ProgressBar::hidden())
    }
}

impl DecisionProvider for ConsolePrompter {
    fn resolve_file(&mut self, conflict: &FileConflict<'_>) -> Result<Decision<FileAction>> {
        let message = format!(
            "{} has local edits and a new template ({} -> {} bytes)",
            conflict.path,
            conflict.current.len(),
            conflict.template.len()
        );
        let choice = self
            .bar
            .suspend(|| Select::new(&message, FileChoice::ALL.to_vec()).prompt())?;

        Ok(choice.into_decision())
    }

    fn resolve_migration(
        &mut self,
        migration: &ClassifiedMigration,
    ) -> Result<Decision<MigrationAction>> {
        let message = format!("{} ({})", migration.item, migration.reason);
        let choice = self
            .bar
            .suspend(|| Select::new(&message, MigrationChoice::ALL.to_vec()).prompt())?;

        Ok(choice.into_decision())
    }

    fn confirm_plan(&mut self, _plan: &UpdatePlan) -> Result<bool> {
        Ok(self.bar.suspend(|| {
            Confirm::new("apply this update?")
                .with_default(true)
                .prompt()
        })?)
    }
}

/// Deterministic decision provider fed from queues of canned answers.
#[derive(Debug, Clone)]
pub struct ScriptedDecisions {
    files: VecDeque<Decision<FileAction>>,
    migrations: VecDeque<Decision<MigrationAction>>,
    confirm: bool,
    asked: Vec<String>,
}

impl Default for ScriptedDecisions {
    fn default() -> Self {
        Self {
            files: VecDeque::new(),
            migrations: VecDeque::new(),
            confirm: true,
            asked: Vec::new(),
        }
    }
}

impl ScriptedDecisions {
    /// Construct provider that confirms plans and has no other answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answer for next file conflict.
    pub fn file(mut self, decision: Decision<FileAction>) -> Self {
        self.files.push_back(decision);
        self
    }

    /// Queue answer for next migration needing confirmation.
    pub fn migration(mut self, decision: Decision<MigrationAction>) -> Self {
        self.migrations.push_back(decision);
        self
    }

    /// Set answer to plan confirmation.
    pub fn confirming(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    /// Every question asked so far, in order.
    pub fn asked(&self) -> &[String] {
        self.asked.as_slice()
    }
}

impl DecisionProvider for ScriptedDecisions {
    fn resolve_file(&mut self, conflict: &FileConflict<'_>) -> Result<Decision<FileAction>> {
        self.asked.push(format!("file {}", conflict.path));
        self.files
            .pop_front()
            .ok_or_else(|| ResolveError::ScriptExhausted {
                item: conflict.path.to_string(),
            })
    }

    fn resolve_migration(
        &mut self,
        migration: &ClassifiedMigration,
    ) -> Result<Decision<MigrationAction>> {
        self.asked.push(format!("migration {}", migration.item));
        self.migrations
            .pop_front()
            .ok_or_else(|| ResolveError::ScriptExhausted {
                item: migration.item.to_string(),
            })
    }

    fn confirm_plan(&mut self, _plan: &UpdatePlan) -> Result<bool> {
        self.asked.push("confirm plan".into());
        Ok(self.confirm)
    }
}

/// Conflict resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Interactive prompt fails or is cancelled.
    #[error(transparent)]
    Prompt(#[from] inquire::InquireError),

    /// Scripted provider ran out of answers.
    #[error("no scripted decision left for {item}")]
    ScriptExhausted { item: String },
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
