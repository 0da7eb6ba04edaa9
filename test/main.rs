// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use tendril::{
    hash::HashStore, migration::MigrationManifest, version::VersionMarker, Catalog,
    ProjectLayout, ScriptedDecisions, Settings, TemplateSet, UpdateOptions, UpdateReport,
    Updater, Version,
};

use anyhow::Result;
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read, read_dir, read_to_string, write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Project directory living for the duration of one test.
pub(crate) struct ProjectFixture {
    dir: TempDir,
    settings: Settings,
}

impl ProjectFixture {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            settings: Settings::default(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn layout(&self) -> Result<ProjectLayout> {
        Ok(ProjectLayout::new(self.path(), &self.settings)?)
    }

    pub(crate) fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            create_dir_all(parent)?;
        }
        write(full, content)?;
        Ok(())
    }

    pub(crate) fn read(&self, path: &str) -> Result<String> {
        Ok(read_to_string(self.path().join(path))?)
    }

    pub(crate) fn exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }

    pub(crate) fn hashes(&self) -> Result<HashStore> {
        Ok(HashStore::load(self.layout()?.hash_record_path()))
    }

    pub(crate) fn installed(&self) -> Result<Option<Version>> {
        Ok(VersionMarker::new(self.layout()?.version_marker_path()).read()?)
    }

    /// Every backup snapshot directory, in name order.
    pub(crate) fn backups(&self) -> Result<Vec<PathBuf>> {
        let parent = self.layout()?.backup_parent();
        if !parent.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in read_dir(parent)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(".backup-") {
                backups.push(entry.path());
            }
        }
        backups.sort();

        Ok(backups)
    }

    /// Relative path to content of every file in project.
    pub(crate) fn tree(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut tree = BTreeMap::new();
        let mut pending = vec![self.path().to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                let relative = path
                    .strip_prefix(self.path())?
                    .to_string_lossy()
                    .replace('\\', "/");
                tree.insert(relative, read(&path)?);
            }
        }

        Ok(tree)
    }

    pub(crate) fn update(
        &self,
        release: &Release,
        options: UpdateOptions,
        provider: &mut ScriptedDecisions,
    ) -> Result<UpdateReport> {
        let mut updater = Updater::new(
            self.layout()?,
            self.settings.clone(),
            release.templates()?,
            release.catalog()?,
            release.version.parse()?,
            options,
        )?;

        Ok(updater.run(provider)?)
    }

    /// Install release into fresh project without any prompts.
    pub(crate) fn install(&self, release: &Release) -> Result<UpdateReport> {
        let options = UpdateOptions {
            assume_yes: true,
            ..UpdateOptions::default()
        };
        self.update(release, options, &mut ScriptedDecisions::new())
    }
}

/// Template set and migration manifests shipped with one version.
#[derive(Debug, Clone)]
pub(crate) struct Release {
    pub(crate) version: &'static str,
    pub(crate) templates: Vec<(&'static str, &'static str)>,
    pub(crate) manifests: Vec<&'static str>,
}

impl Release {
    pub(crate) fn new(version: &'static str) -> Self {
        Self {
            version,
            templates: Vec::new(),
            manifests: Vec::new(),
        }
    }

    pub(crate) fn with_template(mut self, path: &'static str, content: &'static str) -> Self {
        self.templates.push((path, content));
        self
    }

    pub(crate) fn with_manifest(mut self, manifest: &'static str) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub(crate) fn templates(&self) -> Result<TemplateSet> {
        Ok(TemplateSet::from_entries(self.templates.iter().copied())?)
    }

    pub(crate) fn catalog(&self) -> Result<Catalog> {
        let manifests = self
            .manifests
            .iter()
            .map(|manifest| manifest.parse::<MigrationManifest>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Catalog::new(manifests)?)
    }
}
