// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tendril::{
    latest::{fetch_latest, Advisory, DEFAULT_TIMEOUT},
    update::UpdateReport,
    Catalog, ConsolePrompter, ProjectLayout, ScriptedDecisions, Settings, TemplateSet,
    UpdateOptions, Updater, Version, WriteMode,
};

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use futures::FutureExt;
use indicatif::ProgressBar;
use std::{path::PathBuf, process::exit};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "tendril [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Update(opts) => run_update(opts).await,
            Command::Status(opts) => run_status(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Bring project templates up to date, preserving local edits.
    #[command(override_usage = "tendril update [options]")]
    Update(UpdateArgs),

    /// Show what an update would do without changing anything.
    #[command(override_usage = "tendril status [options]")]
    Status(ProjectArgs),
}

#[derive(Args, Clone, Debug)]
struct ProjectArgs {
    /// Project directory to operate on.
    #[arg(short, long, value_name = "dir", default_value = ".")]
    pub project: PathBuf,

    /// Settings file to use instead of the one in the state directory.
    #[arg(short, long, value_name = "file")]
    pub config: Option<PathBuf>,

    /// Directory holding the template set.
    #[arg(short, long, value_name = "dir")]
    pub templates: Option<PathBuf>,

    /// Directory holding migration manifests.
    #[arg(short, long, value_name = "dir")]
    pub migrations: Option<PathBuf>,

    /// Version to update to instead of the running tool version.
    #[arg(long, value_name = "version")]
    pub target_version: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct UpdateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Show plan without touching anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Overwrite locally modified files with template content.
    #[arg(short, long, group = "write_mode")]
    pub force: bool,

    /// Keep every locally modified file as is.
    #[arg(short, long, group = "write_mode")]
    pub skip_all: bool,

    /// Write template content next to locally modified files as `.new` copies.
    #[arg(long, group = "write_mode")]
    pub create_new: bool,

    /// Allow updating to an older version than the installed one.
    #[arg(long)]
    pub allow_downgrade: bool,

    /// Execute pending structural migrations.
    #[arg(long)]
    pub migrate: bool,

    /// Apply plan without asking for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

impl UpdateArgs {
    fn options(&self) -> UpdateOptions {
        let write_mode = if self.force {
            WriteMode::Overwrite
        } else if self.skip_all {
            WriteMode::Skip
        } else if self.create_new {
            WriteMode::CreateNew
        } else {
            WriteMode::Ask
        };

        UpdateOptions {
            dry_run: self.dry_run,
            write_mode,
            allow_downgrade: self.allow_downgrade,
            migrate: self.migrate,
            assume_yes: self.yes,
        }
    }
}

/// Everything loaded from disk before an update can start.
struct Session {
    project: ProjectLayout,
    settings: Settings,
    templates: TemplateSet,
    catalog: Catalog,
    target: Version,
    latest: Option<JoinHandle<Option<Version>>>,
}

impl Session {
    fn load(args: &ProjectArgs) -> Result<Self> {
        let root = args.project.canonicalize()?;
        let settings_path = match &args.config {
            Some(path) => path.clone(),
            None => root.join(".tendril").join("config.toml"),
        };
        let settings = Settings::load(&settings_path)?;
        let project = ProjectLayout::new(&root, &settings)?;

        let templates = args
            .templates
            .clone()
            .or_else(|| settings.templates.clone())
            .ok_or_else(|| anyhow!("no template directory given, use --templates or set `templates`"))?;
        let templates = TemplateSet::from_dir(templates)?;

        let catalog = match args.migrations.clone().or_else(|| settings.migrations.clone()) {
            Some(dir) => Catalog::from_dir(dir)?,
            None => Catalog::default(),
        };

        let target = args
            .target_version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION"))
            .parse::<Version>()?;

        let latest = settings
            .latest_version_url
            .clone()
            .map(|url| tokio::spawn(async move { fetch_latest(&url, DEFAULT_TIMEOUT).await }));

        Ok(Self {
            project,
            settings,
            templates,
            catalog,
            target,
            latest,
        })
    }

    fn updater(&self, options: UpdateOptions, bar: ProgressBar) -> Result<Updater> {
        Ok(Updater::new(
            self.project.clone(),
            self.settings.clone(),
            self.templates.clone(),
            self.catalog.clone(),
            self.target.clone(),
            options,
        )?
        .with_progress(bar))
    }

    /// Print advisory only if the check already finished.
    fn advise(self) {
        let Some(handle) = self.latest else {
            return;
        };

        let latest = handle.now_or_never().and_then(|result| result.ok()).flatten();
        if let Ok(current) = env!("CARGO_PKG_VERSION").parse::<Version>() {
            if let advisory @ Advisory::Newer(_) = Advisory::new(&current, latest) {
                info!("{advisory}");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_update(opts: UpdateArgs) -> Result<()> {
    let session = Session::load(&opts.project)?;
    let bar = ProgressBar::new(0);
    let mut updater = session.updater(opts.options(), bar.clone())?;
    let mut prompter = ConsolePrompter::new(bar);
    let report = updater.run(&mut prompter)?;

    finish(session, report)
}

async fn run_status(opts: ProjectArgs) -> Result<()> {
    let session = Session::load(&opts)?;
    let options = UpdateOptions {
        dry_run: true,
        ..UpdateOptions::default()
    };
    let mut updater = session.updater(options, ProgressBar::hidden())?;
    let report = updater.run(&mut ScriptedDecisions::new())?;

    finish(session, report)
}

fn finish(session: Session, report: UpdateReport) -> Result<()> {
    info!("{report}");
    session.advise();

    if report.outcome.is_failure() {
        bail!("{}", report.outcome);
    }

    Ok(())
}
