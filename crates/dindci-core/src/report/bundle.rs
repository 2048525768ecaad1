//! Host-side bundle: the container's report archive plus the run log

use crate::Result;
use chrono::{DateTime, Utc};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Fields recovered from a `reports_<date>_<tree hash>.tar.gz` file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub date: String,
    pub tree_hash: String,
}

impl ArchiveName {
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let suffix = file_name
            .strip_prefix("reports_")?
            .strip_suffix(".tar.gz")?;
        let (date, tree_hash) = suffix.split_once('_')?;
        if date.is_empty() || tree_hash.is_empty() {
            return None;
        }
        Some(Self {
            date: date.to_string(),
            tree_hash: tree_hash.to_string(),
        })
    }
}

/// `YYYYMMDD_HH_MM_SS_mmm`
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!(
        "{}_{:03}",
        ts.format("%Y%m%d_%H_%M_%S"),
        ts.timestamp_subsec_millis()
    )
}

/// Suffix shared by the bundle and the log inside it.
#[must_use]
pub fn bundle_suffix(inner: Option<&ArchiveName>, timestamp: &str) -> String {
    inner.map_or_else(
        || timestamp.to_string(),
        |name| format!("{}_{timestamp}_{}", name.date, name.tree_hash),
    )
}

/// Combine the (optional) inner report archive and the CI log into
/// `<out_dir>/ci_reports_<PASSED|FAILED>_<suffix>.tar.gz`.
pub fn assemble_bundle(
    out_dir: &Path,
    inner_archive: Option<&Path>,
    ci_log: &Path,
    run_at: DateTime<Utc>,
    passed: bool,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;

    let parsed = inner_archive
        .and_then(Path::file_name)
        .and_then(|name| ArchiveName::parse(&name.to_string_lossy()));
    let suffix = bundle_suffix(parsed.as_ref(), &format_timestamp(run_at));
    let status = if passed { "PASSED" } else { "FAILED" };
    let bundle_path = out_dir.join(format!("ci_reports_{status}_{suffix}.tar.gz"));
    let log_name = format!("ci_test_{suffix}.out");

    let staging = tempfile::tempdir()?;
    if let Some(inner) = inner_archive {
        tar::Archive::new(GzDecoder::new(File::open(inner)?)).unpack(staging.path())?;
    }

    let encoder = GzEncoder::new(File::create(&bundle_path)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let reports = staging.path().join("reports");
    if reports.is_dir() {
        builder.append_dir_all("reports", &reports)?;
    }
    builder.append_path_with_name(ci_log, &log_name)?;
    builder.into_inner()?.finish()?;

    tracing::info!(bundle = %bundle_path.display(), passed, "report bundle written");
    Ok(bundle_path)
}
