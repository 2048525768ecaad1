//! Idempotent group membership reconciliation
//!
//! The decision (`plan`) is pure: current memberships plus the desired group
//! in, the resulting set and whether anything must change out. Applying the
//! change is the job of a [`GroupDatabase`].

use crate::{CiError, Result};
use nix::unistd::{Gid, Group, User};
use std::collections::BTreeSet;
use std::ffi::CString;
use std::path::Path;

/// Outcome of reconciling one user against one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPlan {
    /// Group the user must belong to
    pub group: String,
    /// Memberships after reconciliation
    pub groups: BTreeSet<String>,
    /// Whether the database has to be mutated to get there
    pub needs_change: bool,
}

/// Compute the membership set that includes `desired`.
#[must_use]
pub fn plan(current: &BTreeSet<String>, desired: &str) -> MembershipPlan {
    let mut groups = current.clone();
    let needs_change = groups.insert(desired.to_string());
    MembershipPlan {
        group: desired.to_string(),
        groups,
        needs_change,
    }
}

/// Read and mutate the container's user/group database.
pub trait GroupDatabase {
    /// Name of the group with `gid`, if it exists.
    fn group_name(&self, gid: Gid) -> Result<Option<String>>;

    /// All groups `user` belongs to, primary group included.
    fn groups_of(&self, user: &str) -> Result<BTreeSet<String>>;

    /// Add `user` to the supplementary group `group`.
    fn add_member(&mut self, user: &str, group: &str) -> Result<()>;
}

/// Make sure `user` is in `group`, mutating the database only if needed.
pub fn reconcile<D: GroupDatabase>(db: &mut D, user: &str, group: &str) -> Result<MembershipPlan> {
    let current = db.groups_of(user)?;
    let plan = plan(&current, group);

    if plan.needs_change {
        tracing::info!(user, group, "adding user to group");
        db.add_member(user, group)?;
    } else {
        tracing::info!(user, group, "user already in group");
    }

    Ok(plan)
}

/// The real `/etc/passwd` + `/etc/group` database, mutated with `usermod`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGroups;

impl GroupDatabase for SystemGroups {
    fn group_name(&self, gid: Gid) -> Result<Option<String>> {
        Ok(Group::from_gid(gid)?.map(|g| g.name))
    }

    fn groups_of(&self, user: &str) -> Result<BTreeSet<String>> {
        let entry = User::from_name(user)?
            .ok_or_else(|| CiError::Privilege(format!("service user `{user}` does not exist")))?;
        let name = CString::new(user)
            .map_err(|_| CiError::Usage(format!("user name contains NUL byte: {user:?}")))?;

        let mut groups = BTreeSet::new();
        for gid in nix::unistd::getgrouplist(&name, entry.gid)? {
            match self.group_name(gid)? {
                Some(group) => {
                    groups.insert(group);
                }
                None => {
                    groups.insert(gid.as_raw().to_string());
                }
            }
        }
        Ok(groups)
    }

    fn add_member(&mut self, user: &str, group: &str) -> Result<()> {
        let argv = [
            "usermod".to_string(),
            "-aG".to_string(),
            group.to_string(),
            user.to_string(),
        ];
        crate::process::run_checked("group membership", &argv, Path::new("/"))?;
        Ok(())
    }
}

/// In-memory database for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryGroups {
    names: std::collections::BTreeMap<u32, String>,
    members: std::collections::BTreeMap<String, BTreeSet<String>>,
    mutations: usize,
}

#[cfg(test)]
impl MemoryGroups {
    pub(crate) fn with_group(mut self, gid: u32, name: &str) -> Self {
        self.names.insert(gid, name.to_string());
        self
    }

    pub(crate) fn with_user(mut self, user: &str, groups: &[&str]) -> Self {
        self.members.insert(
            user.to_string(),
            groups.iter().map(|g| (*g).to_string()).collect(),
        );
        self
    }

    pub(crate) const fn mutations(&self) -> usize {
        self.mutations
    }
}

#[cfg(test)]
impl GroupDatabase for MemoryGroups {
    fn group_name(&self, gid: Gid) -> Result<Option<String>> {
        Ok(self.names.get(&gid.as_raw()).cloned())
    }

    fn groups_of(&self, user: &str) -> Result<BTreeSet<String>> {
        self.members
            .get(user)
            .cloned()
            .ok_or_else(|| CiError::Privilege(format!("service user `{user}` does not exist")))
    }

    fn add_member(&mut self, user: &str, group: &str) -> Result<()> {
        self.mutations += 1;
        self.members
            .entry(user.to_string())
            .or_default()
            .insert(group.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn plan_adds_missing_group() {
        let plan = plan(&set(&["dockeruser"]), "docker");
        assert!(plan.needs_change);
        assert_eq!(plan.groups, set(&["docker", "dockeruser"]));
    }

    #[test]
    fn plan_is_a_no_op_for_existing_member() {
        let plan = plan(&set(&["docker", "dockeruser"]), "docker");
        assert!(!plan.needs_change);
        assert_eq!(plan.groups, set(&["docker", "dockeruser"]));
    }

    #[test]
    fn repeated_reconcile_matches_single_run() {
        let mut once = MemoryGroups::default().with_user("dockeruser", &["dockeruser"]);
        reconcile(&mut once, "dockeruser", "docker").unwrap();

        let mut many = MemoryGroups::default().with_user("dockeruser", &["dockeruser"]);
        for _ in 0..5 {
            reconcile(&mut many, "dockeruser", "docker").unwrap();
        }

        assert_eq!(
            once.groups_of("dockeruser").unwrap(),
            many.groups_of("dockeruser").unwrap()
        );
        assert_eq!(many.mutations(), 1);
    }

    #[test]
    fn unknown_user_is_a_privilege_error() {
        let mut db = MemoryGroups::default();
        assert!(matches!(
            reconcile(&mut db, "ghost", "docker"),
            Err(CiError::Privilege(_))
        ));
    }
}
