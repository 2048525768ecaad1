//! The pipeline's terminal artifact

use crate::pipeline::{Identity, StageRecord};
use crate::{CiError, Result};
use chrono::NaiveDate;
use flate2::{Compression, write::GzEncoder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Written to `reports/manifest.json` so an archive describes itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub commit: String,
    pub tree_hash: String,
    /// `YYYYMMDD`
    pub date: String,
    pub stages: Vec<StageRecord>,
}

impl RunManifest {
    #[must_use]
    pub fn new(identity: &Identity, date: NaiveDate, stages: Vec<StageRecord>) -> Self {
        Self {
            commit: identity.commit.clone(),
            tree_hash: identity.tree_hash.clone(),
            date: date.format("%Y%m%d").to_string(),
            stages,
        }
    }
}

/// A finished report archive
#[derive(Debug, Clone)]
pub struct ReportArchive {
    pub path: PathBuf,
    pub manifest: RunManifest,
}

/// `reports_<YYYYMMDD>_<tree hash>.tar.gz`
#[must_use]
pub fn archive_name(date: &str, tree_hash: &str) -> String {
    format!("reports_{date}_{tree_hash}.tar.gz")
}

/// Write the manifest into `reports` and compress the directory into the
/// archive at `root`.
///
/// The archive is built under a temporary name and renamed into place, so a
/// failure never leaves a `reports_*.tar.gz` behind.
pub fn write_archive(root: &Path, reports: &Path, manifest: RunManifest) -> Result<ReportArchive> {
    std::fs::create_dir_all(reports)?;
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| CiError::Config(format!("failed to encode manifest: {e}")))?;
    std::fs::write(reports.join("manifest.json"), json)?;

    let name = archive_name(&manifest.date, &manifest.tree_hash);
    let path = root.join(&name);
    let partial = root.join(format!(".{name}.partial"));
    let arcname = reports
        .file_name()
        .map_or_else(|| PathBuf::from("reports"), PathBuf::from);

    let result = (|| -> Result<()> {
        let encoder = GzEncoder::new(File::create(&partial)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(&arcname, reports)?;
        builder.into_inner()?.finish()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::rename(&partial, &path)?;

    tracing::info!(archive = %path.display(), "reports archived");
    Ok(ReportArchive { path, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use flate2::read::GzDecoder;

    fn identity() -> Identity {
        Identity {
            commit: "c0ffee".into(),
            tree_hash: "4b825dc642cb6eb9a060e54bf8d69288fbee4904".into(),
        }
    }

    #[test]
    fn name_embeds_date_and_full_tree_hash() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let manifest = RunManifest::new(&identity(), date, vec![]);
        assert_eq!(
            archive_name(&manifest.date, &manifest.tree_hash),
            "reports_20260307_4b825dc642cb6eb9a060e54bf8d69288fbee4904.tar.gz"
        );
    }

    #[test]
    fn archive_contains_reports_and_manifest() {
        let root = tempfile::tempdir().unwrap();
        let reports = root.path().join("reports");
        std::fs::create_dir_all(&reports).unwrap();
        std::fs::write(reports.join("junit.xml"), b"<testsuites/>").unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let stages = vec![StageRecord {
            stage: Stage::Sync,
            duration_ms: 12,
            skipped: false,
        }];
        let archive =
            write_archive(root.path(), &reports, RunManifest::new(&identity(), date, stages))
                .unwrap();
        assert!(archive.path.exists());

        let mut names: Vec<String> = tar::Archive::new(GzDecoder::new(
            File::open(&archive.path).unwrap(),
        ))
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
        names.sort();
        assert!(names.contains(&"reports/junit.xml".to_string()));
        assert!(names.contains(&"reports/manifest.json".to_string()));

        let manifest: RunManifest =
            serde_json::from_slice(&std::fs::read(reports.join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.tree_hash, identity().tree_hash);
        assert_eq!(manifest.stages.len(), 1);
    }
}
