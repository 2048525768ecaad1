//! Type-state workspace clone
//!
//! Each stage consumes the workspace in one state and returns it in the next,
//! so tests can only ever run against a tree that passed the post-format clean
//! check.

use super::{Stage, StageRecord};
use crate::config::CommandSet;
use crate::git::{self, Git};
use crate::process::{self, Placeholders};
use crate::report::{self, ReportArchive, RunManifest};
use crate::{CiError, HarnessConfig, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

// Workspace states
#[derive(Debug)]
pub struct Pinned;
#[derive(Debug)]
pub struct Synced;
#[derive(Debug)]
pub struct Verified;
#[derive(Debug)]
pub struct Packaged;
#[derive(Debug)]
pub struct Tested;

/// Where things live inside a clone, relative to its root
#[derive(Debug, Clone)]
pub struct Layout {
    pub project_subdir: PathBuf,
    pub reports_dir: PathBuf,
    pub dist_dir: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            project_subdir: config.project_subdir.clone(),
            reports_dir: config.reports_dir.clone(),
            dist_dir: config.dist_dir.clone(),
        }
    }

    /// Project directory inside a clone rooted at `root`. A subdir made only
    /// of `.` components is the root itself.
    #[must_use]
    pub fn project_dir(&self, root: &Path) -> PathBuf {
        let nested = self
            .project_subdir
            .components()
            .any(|c| !matches!(c, Component::CurDir));
        if nested {
            root.join(&self.project_subdir)
        } else {
            root.to_path_buf()
        }
    }
}

/// The exact source state under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub commit: String,
    pub tree_hash: String,
}

/// A fresh clone that has not been verified yet
#[derive(Debug)]
pub struct Checkout {
    git: Git,
    layout: Layout,
}

impl Checkout {
    /// Clone `source` into a fresh `dest`, optionally checking out `commit`.
    pub fn acquire(source: &Path, dest: &Path, commit: Option<&str>, layout: Layout) -> Result<Self> {
        let git = fresh_clone(source, dest)?;
        if let Some(commit) = commit {
            git.checkout_detached(commit)?;
        }
        Ok(Self { git, layout })
    }

    /// Record the commit, insist on a clean tree, and compute its tree hash.
    pub fn pin(self) -> Result<Workspace<Pinned>> {
        let commit = self.git.head_commit()?;
        require_clean(&self.git, "checkout")?;
        let tree_hash = self.git.head_tree()?;
        tracing::info!(%commit, %tree_hash, "workspace pinned");

        let project = self.layout.project_dir(self.git.dir());
        Ok(Workspace {
            git: self.git,
            reports: project.join(&self.layout.reports_dir),
            dist: project.join(&self.layout.dist_dir),
            project,
            layout: self.layout,
            identity: Identity { commit, tree_hash },
            records: Vec::new(),
            pending_reports: Vec::new(),
            _state: PhantomData,
        })
    }
}

/// A pinned clone moving through the pipeline
#[derive(Debug)]
pub struct Workspace<S> {
    git: Git,
    layout: Layout,
    project: PathBuf,
    reports: PathBuf,
    dist: PathBuf,
    identity: Identity,
    records: Vec<StageRecord>,
    /// Report files produced before the reports directory may exist
    pending_reports: Vec<(String, Vec<u8>)>,
    _state: PhantomData<S>,
}

impl<S> Workspace<S> {
    fn placeholders(&self) -> Placeholders {
        Placeholders::new()
            .with("workspace", &self.project)
            .with("reports", &self.reports)
            .with("dist", &self.dist)
    }

    fn record(&mut self, stage: Stage, started: Instant) {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(%stage, duration_ms, "stage passed");
        self.records.push(StageRecord {
            stage,
            duration_ms,
            skipped: false,
        });
    }

    fn record_skipped(&mut self, stage: Stage) {
        tracing::info!(%stage, "stage skipped");
        self.records.push(StageRecord {
            stage,
            duration_ms: 0,
            skipped: true,
        });
    }

    fn run_stage(&self, stage: Stage, argv: &[String]) -> Result<()> {
        let argv = self.placeholders().expand(argv);
        process::run_checked(stage.as_str(), &argv, &self.project)?;
        Ok(())
    }

    fn into_state<T>(self) -> Workspace<T> {
        Workspace {
            git: self.git,
            layout: self.layout,
            project: self.project,
            reports: self.reports,
            dist: self.dist,
            identity: self.identity,
            records: self.records,
            pending_reports: self.pending_reports,
            _state: PhantomData,
        }
    }
}

impl Workspace<Pinned> {
    /// Materialize the dependency set, dev dependencies included.
    pub fn sync(mut self, commands: &CommandSet) -> Result<Workspace<Synced>> {
        let started = Instant::now();
        self.run_stage(Stage::Sync, &commands.sync)?;
        self.record(Stage::Sync, started);
        Ok(self.into_state())
    }
}

impl Workspace<Synced> {
    /// Run the formatter/linter/type checker, then require that it changed
    /// nothing.
    pub fn lint(mut self, commands: &CommandSet) -> Result<Workspace<Verified>> {
        let started = Instant::now();
        let argv = self.placeholders().expand(&commands.lint);
        let outcome = process::run_captured(Stage::FormatLint.as_str(), &argv, &self.project)?;
        self.pending_reports
            .push(("lint.log".to_string(), outcome.combined()));
        process::check(Stage::FormatLint.as_str(), &argv, outcome)?;
        self.record(Stage::FormatLint, started);

        let started = Instant::now();
        let status = self.git.status_porcelain()?;
        if !status.is_empty() {
            let files = git::changed_paths(&status);
            tracing::error!(?files, "formatter changed the tree");
            return Err(CiError::FormattingDrift { files });
        }
        self.record(Stage::CleanCheck, started);
        Ok(self.into_state())
    }
}

impl Workspace<Verified> {
    /// Build a wheel here and in an independent second clone, install the
    /// second one into a brand-new environment and run the sanity script with
    /// that environment's interpreter only.
    pub fn package(
        mut self,
        commands: &CommandSet,
        source: &Path,
        packaging_dir: &Path,
    ) -> Result<Workspace<Packaged>> {
        let started = Instant::now();
        self.run_stage(Stage::PackageBuild, &commands.build)?;

        let packaging = fresh_clone(source, packaging_dir)?;
        packaging.checkout_detached(&self.identity.commit)?;

        let packaging_project = self.layout.project_dir(packaging.dir());
        let packaging_dist = packaging_project.join(&self.layout.dist_dir);
        let mut vars = Placeholders::new()
            .with("workspace", &packaging_project)
            .with("reports", &self.reports)
            .with("dist", &packaging_dist);
        process::run_checked(
            Stage::PackageBuild.as_str(),
            &vars.expand(&commands.build),
            &packaging_project,
        )?;
        self.record(Stage::PackageBuild, started);

        let started = Instant::now();
        let wheel = single_wheel(&packaging_dist)?;
        let venv = tempfile::Builder::new()
            .prefix("install-check-")
            .tempdir()?;
        let venv_dir = venv.path().join("venv");
        vars.set("venv", &venv_dir);
        vars.set("python", venv_dir.join("bin").join("python"));
        vars.set("wheel", &wheel);
        tracing::info!(wheel = %wheel.display(), venv = %venv_dir.display(), "install check");

        let context = Stage::PackageInstallCheck.as_str();
        for argv in [&commands.create_venv, &commands.install, &commands.sanity] {
            process::run_checked(context, &vars.expand(argv), &packaging_project)?;
        }
        self.record(Stage::PackageInstallCheck, started);
        Ok(self.into_state())
    }

    pub fn skip_packaging(mut self) -> Workspace<Packaged> {
        self.record_skipped(Stage::PackageBuild);
        self.record_skipped(Stage::PackageInstallCheck);
        self.into_state()
    }
}

impl Workspace<Packaged> {
    /// Auxiliary suite, then the primary suite with branch coverage.
    pub fn test(mut self, commands: &CommandSet) -> Result<Workspace<Tested>> {
        std::fs::create_dir_all(&self.reports)?;
        for (name, contents) in std::mem::take(&mut self.pending_reports) {
            std::fs::write(self.reports.join(name), contents)?;
        }

        if commands.aux_tests.is_empty() {
            self.record_skipped(Stage::Test);
        } else {
            let started = Instant::now();
            self.run_stage(Stage::Test, &commands.aux_tests)?;
            self.record(Stage::Test, started);
        }

        let started = Instant::now();
        self.run_stage(Stage::Coverage, &commands.tests)?;
        self.record(Stage::Coverage, started);
        Ok(self.into_state())
    }
}

impl Workspace<Tested> {
    /// Write the manifest and bundle the reports directory.
    pub fn archive(self, date: NaiveDate) -> Result<ReportArchive> {
        let started = Instant::now();
        let manifest = RunManifest::new(&self.identity, date, self.records);
        let archive = report::write_archive(&self.project, &self.reports, manifest)?;
        tracing::info!(
            stage = %Stage::ReportArchive,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "stage passed"
        );
        Ok(archive)
    }
}

fn fresh_clone(source: &Path, dest: &Path) -> Result<Git> {
    if dest.exists() {
        tracing::warn!(dest = %dest.display(), "removing previous clone");
        std::fs::remove_dir_all(dest)?;
    }
    Git::clone_local(source, dest)
}

fn require_clean(git: &Git, checkpoint: &str) -> Result<()> {
    let status = git.status_porcelain()?;
    if status.is_empty() {
        return Ok(());
    }
    Err(CiError::DirtyTree {
        path: git.dir().to_path_buf(),
        checkpoint: checkpoint.to_string(),
        status,
    })
}

/// The one wheel a build produced.
fn single_wheel(dist: &Path) -> Result<PathBuf> {
    let mut wheels = Vec::new();
    for entry in std::fs::read_dir(dist)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "whl") {
            wheels.push(path);
        }
    }
    match wheels.len() {
        1 => Ok(wheels.remove(0)),
        n => Err(CiError::Config(format!(
            "expected exactly one wheel in {}, found {n}",
            dist.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(subdir: &str) -> Layout {
        Layout {
            project_subdir: PathBuf::from(subdir),
            reports_dir: PathBuf::from("reports"),
            dist_dir: PathBuf::from("dist"),
        }
    }

    #[test]
    fn current_dir_subdir_is_the_clone_root() {
        let root = Path::new("/home/dockeruser/git_repos/repo");
        for subdir in [".", "", "./."] {
            let project = layout(subdir).project_dir(root);
            assert_eq!(project, root, "subdir {subdir:?}");
            assert!(!project.to_string_lossy().contains("/./"));
        }
        assert_eq!(layout("pkg").project_dir(root), root.join("pkg"));
    }

    #[test]
    fn single_wheel_is_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg-0.1.0-py3-none-any.whl"), b"").unwrap();
        std::fs::write(dir.path().join("pkg-0.1.0.tar.gz"), b"").unwrap();
        let wheel = single_wheel(dir.path()).unwrap();
        assert_eq!(wheel.file_name().unwrap(), "pkg-0.1.0-py3-none-any.whl");
    }

    #[test]
    fn zero_or_many_wheels_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(single_wheel(dir.path()).is_err());

        std::fs::write(dir.path().join("a-1-py3-none-any.whl"), b"").unwrap();
        std::fs::write(dir.path().join("b-1-py3-none-any.whl"), b"").unwrap();
        assert!(single_wheel(dir.path()).is_err());
    }
}
