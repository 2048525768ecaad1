//! The CI pipeline
//!
//! One fixed shape: clone → pin → sync → format/lint → clean check →
//! packaging sanity → tests → report archive. Every stage gates the next and
//! the first failure ends the run; there are no retries and no archive for an
//! aborted run.

pub mod preflight;
pub mod workspace;

pub use self::preflight::HostEnvironment;
pub use self::workspace::{Checkout, Identity, Layout, Workspace};

use crate::report::ReportArchive;
use crate::{HarnessConfig, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle checkpoints, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Sync,
    FormatLint,
    CleanCheck,
    PackageBuild,
    PackageInstallCheck,
    Test,
    Coverage,
    ReportArchive,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::Sync,
        Self::FormatLint,
        Self::CleanCheck,
        Self::PackageBuild,
        Self::PackageInstallCheck,
        Self::Test,
        Self::Coverage,
        Self::ReportArchive,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::FormatLint => "format-lint",
            Self::CleanCheck => "clean-check",
            Self::PackageBuild => "package-build",
            Self::PackageInstallCheck => "package-install-check",
            Self::Test => "test",
            Self::Coverage => "coverage",
            Self::ReportArchive => "report-archive",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one stage went, as recorded in the run manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration_ms: u64,
    pub skipped: bool,
}

/// What to test
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Local repository to clone from
    pub source: PathBuf,
    /// Commit to check out; `None` tests what the source has checked out
    pub commit: Option<String>,
    /// Skip the packaging sanity stage
    pub skip_packaging: bool,
}

/// Run the whole pipeline and return the archive it produced.
pub fn run(
    options: &PipelineOptions,
    config: &HarnessConfig,
    env: &HostEnvironment,
) -> Result<ReportArchive> {
    env.check(config)?;

    let clone_dir = config.resolve_clone_dir(&options.source)?;
    let packaging_dir = config.resolve_packaging_clone_dir(&clone_dir);
    let layout = Layout::from_config(config);
    let commands = &config.commands;
    let date = chrono::Utc::now().date_naive();

    tracing::info!(
        source = %options.source.display(),
        commit = options.commit.as_deref().unwrap_or("<checked out>"),
        clone = %clone_dir.display(),
        "starting pipeline"
    );

    let archive = Checkout::acquire(
        &options.source,
        &clone_dir,
        options.commit.as_deref(),
        layout,
    )
    .and_then(Checkout::pin)
    .and_then(|ws| ws.sync(commands))
    .and_then(|ws| ws.lint(commands))
    .and_then(|ws| {
        if options.skip_packaging {
            Ok(ws.skip_packaging())
        } else {
            ws.package(commands, &options.source, &packaging_dir)
        }
    })
    .and_then(|ws| ws.test(commands))
    .and_then(|ws| ws.archive(date))?;

    tracing::info!(archive = %archive.path.display(), "pipeline passed");
    Ok(archive)
}
