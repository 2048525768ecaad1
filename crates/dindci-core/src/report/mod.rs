//! Report archives
//!
//! - `archive` - the in-container `reports_<date>_<tree>.tar.gz`
//! - `bundle` - the host-side bundle combining that archive with the run log

pub mod archive;
pub mod bundle;

pub use self::archive::{ReportArchive, RunManifest, archive_name, write_archive};
pub use self::bundle::{ArchiveName, assemble_bundle};
