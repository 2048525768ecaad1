//! Dropping to the target user and replacing the process image
//!
//! CRITICAL: supplementary groups and the gid are set BEFORE the uid; once
//! the uid is dropped the process can no longer change them.

use super::InvocationRequest;
use crate::{CiError, Result};
use nix::errno::Errno;
use nix::unistd::{User, geteuid};
use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStringExt;

/// Exit code for a command that exists but cannot be executed.
pub const NOT_EXECUTABLE_CODE: i32 = 126;

/// Fail unless the effective uid is 0.
pub fn require_root() -> Result<()> {
    let euid = geteuid();
    if euid.is_root() {
        return Ok(());
    }
    Err(CiError::Privilege(format!(
        "entrypoint must run as root (euid is {euid}); \
         choose the user with -u instead of docker's --user"
    )))
}

/// Replace the current process with the requested command, running as the
/// requested user (or `default_user`).
///
/// Only returns on failure. On success the command's exit status becomes
/// this process's exit status.
pub fn exec_as(request: &InvocationRequest, default_user: &str) -> Result<Infallible> {
    let name = request.target_user(default_user);
    let user = User::from_name(name)?
        .ok_or_else(|| CiError::Usage(format!("unknown user `{name}`")))?;

    let argv = to_cstrings(request.command().iter().map(|s| s.clone().into_bytes()))?;
    let env = to_cstrings(
        exec_environment(std::env::vars_os(), &user)
            .into_iter()
            .map(OsStringExt::into_vec),
    )?;

    if geteuid() != user.uid {
        drop_to(&user)?;
    }

    tracing::info!(user = %user.name, command = ?request.command(), "handing off");
    let Err(errno) = nix::unistd::execvpe(&argv[0], &argv, &env);

    let code = match errno {
        Errno::ENOENT => crate::process::SPAWN_FAILURE_CODE,
        _ => NOT_EXECUTABLE_CODE,
    };
    tracing::error!(program = %request.command()[0], error = %errno, "exec failed");
    Err(CiError::Collaborator {
        context: "exec".into(),
        program: request.command()[0].clone(),
        code,
    })
}

fn drop_to(user: &User) -> Result<()> {
    let name = CString::new(user.name.as_bytes())
        .map_err(|_| CiError::Usage(format!("user name contains NUL byte: {:?}", user.name)))?;

    // initgroups reads the group database fresh, so memberships granted a
    // moment ago by the socket reconciliation are included.
    nix::unistd::initgroups(&name, user.gid)
        .map_err(|e| CiError::Privilege(format!("initgroups({}) failed: {e}", user.name)))?;
    nix::unistd::setgid(user.gid)
        .map_err(|e| CiError::Privilege(format!("setgid({}) failed: {e}", user.gid)))?;
    nix::unistd::setuid(user.uid)
        .map_err(|e| CiError::Privilege(format!("setuid({}) failed: {e}", user.uid)))?;

    tracing::debug!(uid = user.uid.as_raw(), gid = user.gid.as_raw(), "credentials dropped");
    Ok(())
}

/// The environment for the replaced process: the current one with the
/// identity variables pointing at `user`.
fn exec_environment(
    current: impl IntoIterator<Item = (OsString, OsString)>,
    user: &User,
) -> Vec<OsString> {
    let identity = [
        ("HOME", user.dir.clone().into_os_string()),
        ("USER", OsString::from(&user.name)),
        ("LOGNAME", OsString::from(&user.name)),
    ];

    let mut env: Vec<OsString> = current
        .into_iter()
        .filter(|(key, _)| !identity.iter().any(|(name, _)| key == name))
        .map(|(key, value)| join_var(&key, &value))
        .collect();
    env.extend(
        identity
            .iter()
            .map(|(key, value)| join_var(&OsString::from(key), value)),
    );
    env
}

fn join_var(key: &OsString, value: &OsString) -> OsString {
    let mut pair = key.clone();
    pair.push("=");
    pair.push(value);
    pair
}

fn to_cstrings(items: impl IntoIterator<Item = Vec<u8>>) -> Result<Vec<CString>> {
    items
        .into_iter()
        .map(|bytes| {
            CString::new(bytes)
                .map_err(|_| CiError::Usage("argument contains NUL byte".into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{Gid, Uid};
    use std::path::PathBuf;

    fn user(name: &str, home: &str) -> User {
        User {
            name: name.into(),
            passwd: CString::new("x").unwrap(),
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
            gecos: CString::new("").unwrap(),
            dir: PathBuf::from(home),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    #[test]
    fn identity_variables_point_at_target_user() {
        let current = vec![
            (OsString::from("HOME"), OsString::from("/root")),
            (OsString::from("USER"), OsString::from("root")),
            (OsString::from("PATH"), OsString::from("/usr/bin")),
        ];
        let env = exec_environment(current, &user("dockeruser", "/home/dockeruser"));

        assert!(env.contains(&OsString::from("HOME=/home/dockeruser")));
        assert!(env.contains(&OsString::from("USER=dockeruser")));
        assert!(env.contains(&OsString::from("LOGNAME=dockeruser")));
        assert!(env.contains(&OsString::from("PATH=/usr/bin")));
        assert!(!env.contains(&OsString::from("HOME=/root")));
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn non_root_caller_is_rejected() {
        if geteuid().is_root() {
            return;
        }
        let err = require_root().unwrap_err();
        assert!(matches!(err, CiError::Privilege(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn nul_in_argument_is_rejected() {
        assert!(to_cstrings(vec![b"a\0b".to_vec()]).is_err());
    }
}
