// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Update orchestration.
//!
//! The [`Updater`] drives one update pass through a fixed sequence of states:
//!
//! ```text
//! Idle -> VersionChecked -> MigrationsClassified -> ChangesAnalyzed
//!      -> PlanPresented -> [DryRunExit | Confirmed] -> BackedUp
//!      -> MigrationsApplied -> FilesWritten -> ConflictsResolved -> Finalized
//! ```
//!
//! Any state up to and including `PlanPresented` may also end in `Aborted`,
//! when a downgrade is blocked, a breaking release requires `--migrate`, or
//! the user declines the plan.
//!
//! # Guarantees
//!
//! - Nothing is written before `Confirmed`, so dry runs have no side effects.
//! - A backup of every managed file exists before the first mutation, and
//!   is only taken if some migration or file decision actually writes.
//! - Every decision is made before the backup, so prompts never interleave
//!   with mutation.
//! - Failures of single files or migrations are collected into the report,
//!   and never stop the rest of the run.
//! - Only a blocked downgrade, a failed backup, or failure to persist the hash
//!   record or version marker end the run early.

use crate::{
    analyze::{ChangeAnalyzer, ChangeKind, ChangeSet, Origin, Projection},
    backup::BackupManager,
    config::Settings,
    hash::HashStore,
    layout::{self, ManagedRoots, ProjectLayout},
    migration::{
        classify::{ClassifiedMigration, MigrationClass, MigrationClassifier},
        execute::{mark_executable, MigrationExecutor},
        Catalog, MigrationItem, MigrationMetadata,
    },
    resolve::{sibling_path, ConflictResolver, DecisionProvider, FileAction, FileConflict, WriteMode},
    template::TemplateSet,
    version::{Version, VersionMarker},
    ItemFailure,
};

use chrono::Local;
use indicatif::ProgressBar;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read, write},
    path::PathBuf,
};
use tracing::{debug, info, instrument, warn};

/// Knobs for one update run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Classify and plan, but never write.
    pub dry_run: bool,

    /// How to settle items that need confirmation.
    pub write_mode: WriteMode,

    /// Proceed even if installed version is newer than target.
    pub allow_downgrade: bool,

    /// Execute pending migrations this run.
    pub migrate: bool,

    /// Skip plan confirmation.
    pub assume_yes: bool,
}

/// States of an update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    VersionChecked,
    MigrationsClassified,
    ChangesAnalyzed,
    PlanPresented,
    Confirmed,
    BackedUp,
    MigrationsApplied,
    FilesWritten,
    ConflictsResolved,
    Finalized,
    DryRunExit,
    Aborted,
}

/// Why a run stopped before touching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Installed version is newer than target, and no override was given.
    Downgrade { installed: Version, target: Version },

    /// User declined the presented plan.
    Declined,

    /// Pending release is breaking and asks for `--migrate`.
    MigrationRequired,
}

impl Display for AbortReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Downgrade { installed, target } => write!(
                fmt,
                "refusing to downgrade from {installed} to {target} without --allow-downgrade"
            ),
            Self::Declined => fmt.write_str("update declined"),
            Self::MigrationRequired => {
                fmt.write_str("this release requires migration, rerun with --migrate")
            }
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finalized,
    DryRun,
    Aborted(AbortReason),
}

impl Outcome {
    /// Check if outcome should fail the process.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted(AbortReason::Downgrade { .. }))
    }
}

impl Display for Outcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Finalized => fmt.write_str("update complete"),
            Self::DryRun => fmt.write_str("dry run, nothing was changed"),
            Self::Aborted(reason) => write!(fmt, "aborted: {reason}"),
        }
    }
}

/// Everything the engine intends to do, before it does it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Installed version, `None` if unknown.
    pub installed: Option<Version>,

    /// Version being installed.
    pub target: Version,

    /// Aggregated release metadata for the pending range.
    pub metadata: MigrationMetadata,

    /// Classified pending migrations, in manifest order.
    pub migrations: Vec<ClassifiedMigration>,

    /// Pending migrations will be executed this run.
    pub migrate: bool,

    /// Template classification. Rename destinations are analyzed as they will
    /// look once pending migrations run.
    pub changes: ChangeSet,

    /// Templates held back until their pending rename is applied.
    pub deferred: Vec<String>,

    /// Templates that are never written, e.g., because they fall outside
    /// every managed root.
    pub rejected: Vec<ItemFailure>,
}

impl UpdatePlan {
    /// Iterate through migrations of given class.
    pub fn migrations_of(&self, class: MigrationClass) -> impl Iterator<Item = &ClassifiedMigration> {
        self.migrations
            .iter()
            .filter(move |migration| migration.class == class)
    }

    /// Check if some pending migration would apply given `--migrate`.
    pub fn has_applicable_migrations(&self) -> bool {
        self.migrations.iter().any(|migration| {
            matches!(
                migration.class,
                MigrationClass::Auto | MigrationClass::NeedsConfirmation
            )
        })
    }

    /// Check if executing plan under write mode may touch any template path.
    pub fn mutates_templates(&self, mode: WriteMode) -> bool {
        let migrations = self.migrate
            && (self.migrations_of(MigrationClass::Auto).next().is_some()
                || (mode.applies_migrations()
                    && self
                        .migrations_of(MigrationClass::NeedsConfirmation)
                        .next()
                        .is_some()));
        let writes = self.changes.count(ChangeKind::New) > 0
            || self.changes.count(ChangeKind::AutoUpdate) > 0;
        let conflicts =
            mode != WriteMode::Skip && self.changes.count(ChangeKind::NeedsConfirmation) > 0;

        migrations || writes || conflicts
    }
}

impl Display for UpdatePlan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.installed {
            Some(installed) => writeln!(fmt, "version: {installed} -> {}", self.target)?,
            None => writeln!(fmt, "version: unknown -> {}", self.target)?,
        }

        if self.metadata.breaking {
            writeln!(fmt, "breaking release")?;
        }
        for note in &self.metadata.changelog {
            writeln!(fmt, "  {}: {}", note.version, note.text.trim())?;
        }

        if !self.migrations.is_empty() {
            match self.migrate {
                true => writeln!(fmt, "migrations:")?,
                false => writeln!(fmt, "migrations (not executed without --migrate):")?,
            }
            for migration in &self.migrations {
                writeln!(fmt, "  {:<18} {migration}", migration.class.to_string())?;
            }
        }

        writeln!(
            fmt,
            "files: {} new, {} auto-update, {} unchanged, {} need confirmation",
            self.changes.count(ChangeKind::New),
            self.changes.count(ChangeKind::AutoUpdate),
            self.changes.count(ChangeKind::Unchanged),
            self.changes.count(ChangeKind::NeedsConfirmation),
        )?;
        for path in self.changes.paths(ChangeKind::NeedsConfirmation) {
            writeln!(fmt, "  modified: {path}")?;
        }
        for path in &self.deferred {
            writeln!(fmt, "  deferred: {path}")?;
        }
        for failure in self.rejected.iter().chain(&self.changes.failures) {
            writeln!(fmt, "  error: {failure}")?;
        }

        Ok(())
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub outcome: Outcome,
    pub installed: Option<Version>,
    pub target: Version,

    /// Plan presented before any mutation, absent if the run stopped before
    /// planning.
    pub plan: Option<UpdatePlan>,

    /// Snapshot taken before mutation, if any.
    pub backup: Option<PathBuf>,

    pub applied_migrations: Vec<MigrationItem>,
    pub skipped_migrations: Vec<MigrationItem>,
    pub conflicting_migrations: Vec<ClassifiedMigration>,

    /// Migrations left for a later run with `--migrate`.
    pub deferred_migrations: Vec<MigrationItem>,

    /// Directories removed after migrations emptied them.
    pub pruned: Vec<String>,

    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub overwritten: Vec<String>,

    /// Files whose user edits were kept.
    pub kept: Vec<String>,

    /// Sibling copies written next to user edits.
    pub copied: Vec<String>,

    /// Unchanged files whose hash got recorded.
    pub adopted: Vec<String>,

    pub failures: Vec<ItemFailure>,

    /// Follow-up document written after a breaking migration.
    pub followup: Option<PathBuf>,
}

impl UpdateReport {
    fn new(installed: Option<Version>, target: Version) -> Self {
        Self {
            outcome: Outcome::Finalized,
            installed,
            target,
            plan: None,
            backup: None,
            applied_migrations: Vec::new(),
            skipped_migrations: Vec::new(),
            conflicting_migrations: Vec::new(),
            deferred_migrations: Vec::new(),
            pruned: Vec::new(),
            added: Vec::new(),
            updated: Vec::new(),
            overwritten: Vec::new(),
            kept: Vec::new(),
            copied: Vec::new(),
            adopted: Vec::new(),
            failures: Vec::new(),
            followup: None,
        }
    }

    /// Number of template paths whose content changed on disk.
    pub fn files_changed(&self) -> usize {
        self.added.len() + self.updated.len() + self.overwritten.len() + self.copied.len()
    }
}

impl Display for UpdateReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{}", self.outcome)?;
        if self.outcome != Outcome::Finalized {
            return Ok(());
        }

        if let Some(backup) = &self.backup {
            writeln!(fmt, "backup: {}", backup.display())?;
        }

        let migrations = [
            ("migrated", self.applied_migrations.iter().map(ToString::to_string).collect::<Vec<_>>()),
            ("left in place", self.skipped_migrations.iter().map(ToString::to_string).collect()),
            ("conflict", self.conflicting_migrations.iter().map(ToString::to_string).collect()),
            ("awaiting --migrate", self.deferred_migrations.iter().map(ToString::to_string).collect()),
        ];
        for (label, items) in &migrations {
            for item in items {
                writeln!(fmt, "  {label}: {item}")?;
            }
        }

        let files = [
            ("added", &self.added),
            ("updated", &self.updated),
            ("overwritten", &self.overwritten),
            ("kept", &self.kept),
            ("copy written", &self.copied),
        ];
        for (label, paths) in files {
            for path in paths {
                writeln!(fmt, "  {label}: {path}")?;
            }
        }
        if !self.adopted.is_empty() {
            writeln!(fmt, "  tracking {} unchanged files", self.adopted.len())?;
        }

        for failure in &self.failures {
            writeln!(fmt, "  error: {failure}")?;
        }
        if let Some(followup) = &self.followup {
            writeln!(fmt, "follow-up notes: {}", followup.display())?;
        }
        if self.files_changed() == 0 && self.applied_migrations.is_empty() {
            writeln!(fmt, "nothing to do")?;
        }

        Ok(())
    }
}

/// Drive one update pass over a project.
#[derive(Debug)]
pub struct Updater {
    project: ProjectLayout,
    settings: Settings,
    roots: ManagedRoots,
    templates: TemplateSet,
    catalog: Catalog,
    target: Version,
    options: UpdateOptions,
    bar: ProgressBar,
    state: UpdateState,
}

impl Updater {
    /// Construct new updater.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Config`] if managed roots cannot be derived.
    pub fn new(
        project: ProjectLayout,
        settings: Settings,
        templates: TemplateSet,
        catalog: Catalog,
        target: Version,
        options: UpdateOptions,
    ) -> Result<Self> {
        let roots = settings.managed_roots(&templates)?;

        Ok(Self {
            project,
            settings,
            roots,
            templates,
            catalog,
            target,
            options,
            bar: ProgressBar::hidden(),
            state: UpdateState::Idle,
        })
    }

    /// Report backup progress through given progress bar.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    /// Current state of the run.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Managed roots in effect for this run.
    pub fn roots(&self) -> &ManagedRoots {
        &self.roots
    }

    /// Run one update pass.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Version`] if version marker cannot be read or
    ///   written.
    /// - Return [`UpdateError::Backup`] if a required backup fails.
    /// - Return [`UpdateError::Resolve`] if decision provider fails.
    /// - Return [`UpdateError::Hash`] if hash record cannot be saved.
    #[instrument(skip(self, provider), level = "debug")]
    pub fn run(&mut self, provider: &mut dyn DecisionProvider) -> Result<UpdateReport> {
        self.transition(UpdateState::Idle);
        let marker = VersionMarker::new(self.project.version_marker_path());
        let installed = marker.read()?;
        let mut report = UpdateReport::new(installed.clone(), self.target.clone());

        if let Some(installed) = &installed {
            if *installed > self.target {
                if !self.options.allow_downgrade {
                    warn!("installed version {installed} is newer than {}", self.target);
                    return Ok(self.abort(
                        report,
                        AbortReason::Downgrade {
                            installed: installed.clone(),
                            target: self.target.clone(),
                        },
                    ));
                }
                warn!("downgrading from {installed} to {}", self.target);
            }
        }
        self.transition(UpdateState::VersionChecked);

        let mut hashes = HashStore::load(self.project.hash_record_path());
        let (pending, metadata) = match &installed {
            Some(installed) => (
                self.catalog.migrations_between(installed, &self.target),
                self.catalog.metadata(installed, &self.target),
            ),
            None => {
                warn!("installed version unknown, skipping migrations");
                (Vec::new(), MigrationMetadata::default())
            }
        };
        let migrations =
            MigrationClassifier::new(self.project.root(), &self.roots, &hashes, &self.templates)
                .classify(&pending);
        self.transition(UpdateState::MigrationsClassified);

        let mut plan = self.plan(installed, metadata, migrations, &hashes);
        self.transition(UpdateState::ChangesAnalyzed);

        info!("update plan:\n{plan}");
        self.transition(UpdateState::PlanPresented);

        if self.options.dry_run {
            report.outcome = Outcome::DryRun;
            report.plan = Some(plan);
            self.transition(UpdateState::DryRunExit);
            return Ok(report);
        }

        if !plan.migrate
            && plan.metadata.breaking
            && plan.metadata.recommend_migrate
            && plan.has_applicable_migrations()
        {
            warn!("breaking release requires --migrate");
            report.plan = Some(plan);
            return Ok(self.abort(report, AbortReason::MigrationRequired));
        }

        let mode = self.options.write_mode;
        if plan.mutates_templates(mode)
            && !self.options.assume_yes
            && !mode.is_unattended()
            && !provider.confirm_plan(&plan)?
        {
            report.plan = Some(plan);
            return Ok(self.abort(report, AbortReason::Declined));
        }
        self.transition(UpdateState::Confirmed);

        let mut resolver = ConflictResolver::new(mode, provider);
        let mut accepted = Vec::new();
        for migration in &plan.migrations {
            match (migration.class, plan.migrate) {
                (MigrationClass::Skip, _) => {
                    debug!("skip {migration}");
                    report.skipped_migrations.push(migration.item.clone());
                }
                (MigrationClass::Conflict, _) => {
                    warn!("leaving conflicting migration untouched: {migration}");
                    report.conflicting_migrations.push(migration.clone());
                }
                (_, false) => report.deferred_migrations.push(migration.item.clone()),
                (MigrationClass::Auto, true) => accepted.push(migration.item.clone()),
                (MigrationClass::NeedsConfirmation, true) => {
                    match resolver.resolve_migration(migration)?.applies() {
                        true => accepted.push(migration.item.clone()),
                        false => report.skipped_migrations.push(migration.item.clone()),
                    }
                }
            }
        }

        // INVARIANT: Files are classified against the disk state that the
        // accepted migrations produce, never against rejected ones.
        let eligible = self.eligible(&plan.deferred);
        let projection = Projection::from_migrations(accepted.clone());
        plan.changes = ChangeAnalyzer::new(self.project.root(), &hashes).analyze(&eligible, &projection);

        let mut decisions = BTreeMap::new();
        for path in plan.changes.paths(ChangeKind::NeedsConfirmation) {
            let (Some(template), Ok(current)) =
                (self.templates.content(path), self.projected_content(&projection, path))
            else {
                continue;
            };
            let conflict = FileConflict {
                path,
                current: &current,
                template,
            };
            decisions.insert(path.to_string(), resolver.resolve_file(&conflict)?);
        }

        let mutates = !accepted.is_empty()
            || plan.changes.count(ChangeKind::New) > 0
            || plan.changes.count(ChangeKind::AutoUpdate) > 0
            || decisions
                .iter()
                .any(|(path, action)| self.resolution_writes(path, *action));
        if mutates {
            let manager =
                BackupManager::new(&self.project, &self.roots, &self.settings.backup_exclude)?;
            report.backup = manager.snapshot(&self.bar)?;
        }
        self.transition(UpdateState::BackedUp);

        if !accepted.is_empty() {
            let executed = MigrationExecutor::new(
                self.project.root(),
                &self.roots,
                &mut hashes,
                &self.settings.executable_extensions,
            )
            .execute(accepted);
            report.applied_migrations = executed.applied;
            report.pruned = executed.pruned;
            report.failures.extend(executed.failed);

            // INVARIANT: Never write templates against projected state.
            plan.changes = ChangeAnalyzer::new(self.project.root(), &hashes)
                .analyze(&eligible, &Projection::identity());
        }
        self.transition(UpdateState::MigrationsApplied);

        report.failures.extend(plan.rejected.iter().cloned());
        report.failures.extend(plan.changes.failures.iter().cloned());

        let mut conflicts = Vec::new();
        for change in &plan.changes.changes {
            let Some(content) = self.templates.content(&change.path) else {
                continue;
            };
            let path = change.path.as_str();
            match change.kind {
                ChangeKind::New | ChangeKind::AutoUpdate => {
                    match self.write_template(&mut hashes, path, content) {
                        Ok(()) if change.kind == ChangeKind::New => report.added.push(path.into()),
                        Ok(()) => report.updated.push(path.into()),
                        Err(err) => report.failures.push(ItemFailure::new(path, err)),
                    }
                }
                ChangeKind::Unchanged => {
                    if !hashes.is_verified(path, content) {
                        hashes.update(path, content);
                        report.adopted.push(path.into());
                    }
                }
                ChangeKind::NeedsConfirmation => conflicts.push(path),
            }
        }
        self.transition(UpdateState::FilesWritten);

        for path in conflicts {
            let Some(template) = self.templates.content(path) else {
                continue;
            };
            let action = match decisions.get(path) {
                Some(action) => *action,
                None => {
                    let current = match read(self.project.resolve(path)) {
                        Ok(current) => current,
                        Err(err) => {
                            report.failures.push(ItemFailure::new(path, err));
                            continue;
                        }
                    };
                    let conflict = FileConflict {
                        path,
                        current: &current,
                        template,
                    };
                    resolver.resolve_file(&conflict)?
                }
            };

            match action {
                FileAction::Overwrite => match self.write_template(&mut hashes, path, template) {
                    Ok(()) => report.overwritten.push(path.into()),
                    Err(err) => report.failures.push(ItemFailure::new(path, err)),
                },
                FileAction::Skip => report.kept.push(path.into()),
                FileAction::CreateSiblingCopy => {
                    let sibling = sibling_path(path);
                    if self.holds(&sibling, template) {
                        info!("{sibling} already holds current template");
                        report.kept.push(path.into());
                        continue;
                    }
                    match self.write_file(&sibling, template) {
                        Ok(()) => report.copied.push(sibling),
                        Err(err) => report.failures.push(ItemFailure::new(sibling, err)),
                    }
                }
            }
        }
        self.transition(UpdateState::ConflictsResolved);

        if plan.metadata.breaking && !report.applied_migrations.is_empty() {
            match self.write_followup(&plan, &report) {
                Ok(path) => report.followup = Some(path),
                Err(err) => report
                    .failures
                    .push(ItemFailure::new(self.project.state_dir(), err)),
            }
        }

        if hashes.is_dirty() {
            hashes.save()?;
        }
        // INVARIANT: Deferred migrations must stay in the pending range.
        if !report.deferred_migrations.is_empty() {
            warn!("version marker left as is until pending migrations run with --migrate");
        } else if report.installed.as_ref() != Some(&self.target) {
            marker.write(&self.target)?;
        }

        report.plan = Some(plan);
        report.outcome = Outcome::Finalized;
        self.transition(UpdateState::Finalized);
        info!(
            "updated to {}: {} files changed, {} migrations applied, {} failures",
            self.target,
            report.files_changed(),
            report.applied_migrations.len(),
            report.failures.len()
        );

        Ok(report)
    }

    fn plan(
        &self,
        installed: Option<Version>,
        metadata: MigrationMetadata,
        migrations: Vec<ClassifiedMigration>,
        hashes: &HashStore,
    ) -> UpdatePlan {
        let migrate = self.options.migrate;
        let applicable = migrations
            .iter()
            .filter(|migration| {
                matches!(
                    migration.class,
                    MigrationClass::Auto | MigrationClass::NeedsConfirmation
                )
            })
            .map(|migration| migration.item.clone())
            .collect::<Vec<_>>();

        let deferred = match migrate {
            true => Vec::new(),
            false => self
                .templates
                .iter()
                .map(|entry| entry.path())
                .filter(|path| {
                    applicable.iter().any(|item| {
                        item.is_rename() && layout::is_within(path, item.destination())
                    })
                })
                .map(String::from)
                .collect(),
        };

        let rejected = self
            .templates
            .iter()
            .filter(|entry| !self.roots.is_managed(entry.path()))
            .map(|entry| ItemFailure::new(entry.path(), "outside managed roots"))
            .collect::<Vec<_>>();

        let projection = match migrate {
            true => Projection::from_migrations(applicable),
            false => Projection::identity(),
        };
        let eligible = self.eligible(&deferred);
        let changes = ChangeAnalyzer::new(self.project.root(), hashes).analyze(&eligible, &projection);

        UpdatePlan {
            installed,
            target: self.target.clone(),
            metadata,
            migrations,
            migrate,
            changes,
            deferred,
            rejected,
        }
    }

    fn eligible(&self, deferred: &[String]) -> TemplateSet {
        let mut eligible = TemplateSet::new();
        for entry in &self.templates {
            // INVARIANT: Templates are only ever written beneath a managed root.
            if self.roots.is_managed(entry.path()) && !deferred.iter().any(|path| path == entry.path()) {
                eligible.insert(entry.clone());
            }
        }

        eligible
    }

    fn projected_content(&self, projection: &Projection, path: &str) -> std::io::Result<Vec<u8>> {
        match projection.origin(path) {
            Origin::At(source) => read(self.project.resolve(source)),
            Origin::Vacated => Ok(Vec::new()),
        }
    }

    fn holds(&self, path: &str, content: &[u8]) -> bool {
        read(self.project.resolve(path)).is_ok_and(|current| current == content)
    }

    /// Check if carrying out a file decision changes anything on disk.
    fn resolution_writes(&self, path: &str, action: FileAction) -> bool {
        match action {
            FileAction::Overwrite => true,
            FileAction::Skip => false,
            FileAction::CreateSiblingCopy => self
                .templates
                .content(path)
                .is_some_and(|template| !self.holds(&sibling_path(path), template)),
        }
    }

    fn write_template(&self, hashes: &mut HashStore, path: &str, content: &[u8]) -> std::io::Result<()> {
        self.write_file(path, content)?;
        hashes.update(path, content);
        Ok(())
    }

    fn write_file(&self, path: &str, content: &[u8]) -> std::io::Result<()> {
        let full = self.project.resolve(path);
        if let Some(parent) = full.parent() {
            mkdirp::mkdirp(parent)?;
        }
        write(&full, content)?;
        mark_executable(&full, &self.settings.executable_extensions)?;
        debug!("wrote {path}");

        Ok(())
    }

    fn write_followup(&self, plan: &UpdatePlan, report: &UpdateReport) -> std::io::Result<PathBuf> {
        let dir = self.project.followup_dir();
        mkdirp::mkdirp(&dir)?;
        let date = Local::now().format("%Y-%m-%d");
        let path = dir.join(format!("{date}-migrate-to-{}.md", self.target));
        write(&path, followup_document(plan, report))?;
        info!("wrote follow-up notes to {:?}", path.display());

        Ok(path)
    }

    fn transition(&mut self, state: UpdateState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn abort(&mut self, mut report: UpdateReport, reason: AbortReason) -> UpdateReport {
        info!("{reason}");
        report.outcome = Outcome::Aborted(reason);
        self.transition(UpdateState::Aborted);
        report
    }
}

fn followup_document(plan: &UpdatePlan, report: &UpdateReport) -> String {
    let mut doc = format!("# Migrate to {}\n\n", plan.target);
    if let Some(installed) = &plan.installed {
        doc.push_str(&format!("Upgraded from {installed}.\n\n"));
    }

    if !plan.metadata.changelog.is_empty() {
        doc.push_str("## Changes\n\n");
        for note in &plan.metadata.changelog {
            doc.push_str(&format!("- {}: {}\n", note.version, note.text.trim()));
        }
        doc.push('\n');
    }

    doc.push_str("## Applied migrations\n\n");
    for item in &report.applied_migrations {
        doc.push_str(&format!("- [x] {item}\n"));
    }
    doc.push('\n');

    let manual = report
        .skipped_migrations
        .iter()
        .filter(|item| {
            plan.migrations
                .iter()
                .any(|migration| &migration.item == *item && migration.class != MigrationClass::Skip)
        })
        .map(ToString::to_string)
        .chain(report.conflicting_migrations.iter().map(ToString::to_string))
        .collect::<Vec<_>>();
    if !manual.is_empty() {
        doc.push_str("## Needs manual attention\n\n");
        for item in manual {
            doc.push_str(&format!("- [ ] {item}\n"));
        }
        doc.push('\n');
    }

    for guide in &plan.metadata.migration_guides {
        doc.push_str(&format!("## Guide for {}\n\n{}\n\n", guide.version, guide.text.trim()));
    }

    doc
}

/// Update orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Version marker cannot be read or written.
    #[error(transparent)]
    Version(#[from] crate::version::VersionError),

    /// Managed roots cannot be derived from settings.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Hash record cannot be saved.
    #[error(transparent)]
    Hash(#[from] crate::hash::HashError),

    /// Required backup fails.
    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),

    /// Decision provider fails.
    #[error(transparent)]
    Resolve(#[from] crate::resolve::ResolveError),
}

/// Friendly result alias :3
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
