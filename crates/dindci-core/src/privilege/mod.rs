//! Entrypoint privilege resolution
//!
//! This module contains the root-only half of the container entrypoint:
//! - `socket` - reading the Docker socket's owning group
//! - `membership` - idempotent group membership reconciliation
//! - `invocation` - the command the entrypoint was asked to run
//! - `handoff` - dropping to the target user and replacing the process image

pub mod handoff;
pub mod invocation;
pub mod membership;
pub mod socket;

pub use self::handoff::{exec_as, require_root};
pub use self::invocation::InvocationRequest;
pub use self::membership::{GroupDatabase, MembershipPlan, SystemGroups};

use crate::{EntrypointConfig, Result};

/// Grant the service user membership in the group owning the Docker socket.
///
/// Returns `None` when there is no socket to reconcile against.
pub fn resolve_socket_group<D: GroupDatabase>(
    db: &mut D,
    config: &EntrypointConfig,
) -> Result<Option<MembershipPlan>> {
    let Some(gid) = socket::socket_gid(&config.socket_path)? else {
        tracing::warn!(
            socket = %config.socket_path.display(),
            "docker socket not present, leaving group membership unchanged"
        );
        return Ok(None);
    };

    let group = socket::group_name_or(db, gid, &config.fallback_group)?;
    let plan = membership::reconcile(db, &config.service_user, &group)?;
    Ok(Some(plan))
}

#[cfg(test)]
mod tests {
    use super::membership::MemoryGroups;
    use super::*;

    fn socket_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("docker.sock");
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn missing_socket_is_skipped() {
        let mut db = MemoryGroups::default().with_user("dockeruser", &["dockeruser"]);
        let config = EntrypointConfig::builder()
            .socket_path("/nonexistent/docker.sock")
            .service_user("dockeruser")
            .build();
        assert!(resolve_socket_group(&mut db, &config).unwrap().is_none());
        assert_eq!(db.mutations(), 0);
    }

    #[test]
    fn socket_group_is_granted_once() {
        let dir = tempfile::tempdir().unwrap();
        let socket = socket_file(&dir);
        let gid = socket::socket_gid(&socket).unwrap().unwrap().as_raw();
        let mut db = MemoryGroups::default()
            .with_group(gid, "docker")
            .with_user("dockeruser", &["dockeruser"]);
        let config = EntrypointConfig::builder()
            .socket_path(socket)
            .service_user("dockeruser")
            .build();

        let first = resolve_socket_group(&mut db, &config).unwrap().unwrap();
        assert!(first.needs_change);
        assert!(first.groups.contains("docker"));

        for _ in 0..3 {
            let again = resolve_socket_group(&mut db, &config).unwrap().unwrap();
            assert!(!again.needs_change);
            assert_eq!(again.groups, first.groups);
        }
        assert_eq!(db.mutations(), 1);
    }

    #[test]
    fn unmapped_socket_gid_falls_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        // The fake database knows no group names at all, so whatever gid the
        // socket file has stays unresolved.
        let mut db = MemoryGroups::default().with_user("dockeruser", &["dockeruser"]);
        let config = EntrypointConfig::builder()
            .socket_path(socket_file(&dir))
            .service_user("dockeruser")
            .build();

        let plan = resolve_socket_group(&mut db, &config).unwrap().unwrap();
        assert_eq!(plan.group, "root");
        assert!(db.groups_of("dockeruser").unwrap().contains("root"));
    }

    #[test]
    fn fallback_group_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = MemoryGroups::default().with_user("dockeruser", &["dockeruser"]);
        let config = EntrypointConfig::builder()
            .socket_path(socket_file(&dir))
            .service_user("dockeruser")
            .fallback_group("docker-host")
            .build();

        let plan = resolve_socket_group(&mut db, &config).unwrap().unwrap();
        assert_eq!(plan.group, "docker-host");
        assert!(!db.groups_of("dockeruser").unwrap().contains("root"));
    }
}
