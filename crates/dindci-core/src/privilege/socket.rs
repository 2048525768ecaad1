//! Docker socket group ownership

use super::membership::GroupDatabase;
use crate::Result;
use nix::errno::Errno;
use nix::unistd::Gid;
use std::path::Path;

/// Group id owning the socket, or `None` if the socket does not exist.
pub fn socket_gid(path: &Path) -> Result<Option<Gid>> {
    match nix::sys::stat::stat(path) {
        Ok(st) => {
            let gid = Gid::from_raw(st.st_gid);
            tracing::debug!(socket = %path.display(), gid = gid.as_raw(), "socket owner group");
            Ok(Some(gid))
        }
        Err(Errno::ENOENT) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Name of `gid`, or `fallback` when the container has no such group.
pub fn group_name_or<D: GroupDatabase>(db: &D, gid: Gid, fallback: &str) -> Result<String> {
    if let Some(name) = db.group_name(gid)? {
        return Ok(name);
    }
    tracing::info!(
        gid = gid.as_raw(),
        fallback,
        "socket gid has no group name, using fallback"
    );
    Ok(fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::membership::MemoryGroups;
    use super::*;

    #[test]
    fn gid_999_without_name_maps_to_root() {
        let db = MemoryGroups::default();
        let name = group_name_or(&db, Gid::from_raw(999), "root").unwrap();
        assert_eq!(name, "root");
    }

    #[test]
    fn named_gid_is_used() {
        let db = MemoryGroups::default().with_group(999, "docker");
        let name = group_name_or(&db, Gid::from_raw(999), "root").unwrap();
        assert_eq!(name, "docker");
    }

    #[test]
    fn absent_socket_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(socket_gid(&dir.path().join("missing.sock")).unwrap().is_none());
    }
}
