//! Harness pre-flight checks

use crate::{EnvironmentFault, HarnessConfig, Result};
use nix::unistd::{User, geteuid};

/// The bits of the process environment the harness insists on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Value of the CI marker variable, if set
    pub ci_marker: Option<String>,
    /// Name of the user the harness is running as
    pub user: String,
}

impl HostEnvironment {
    /// Read the marker variable and the effective user from the process.
    pub fn capture(marker_var: &str) -> Result<Self> {
        let euid = geteuid();
        let user = User::from_uid(euid)?.map_or_else(|| euid.to_string(), |u| u.name);
        Ok(Self {
            ci_marker: std::env::var(marker_var).ok(),
            user,
        })
    }

    /// The container must be CI-capable, and we must be the service user.
    pub fn check(&self, config: &HarnessConfig) -> Result<()> {
        if self.ci_marker.as_deref().is_none_or(str::is_empty) {
            return Err(EnvironmentFault::MissingMarker {
                var: config.ci_marker_var.clone(),
            }
            .into());
        }
        if self.user != config.service_user {
            return Err(EnvironmentFault::WrongUser {
                expected: config.service_user.clone(),
                actual: self.user.clone(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CiError;

    fn env(marker: Option<&str>, user: &str) -> HostEnvironment {
        HostEnvironment {
            ci_marker: marker.map(str::to_string),
            user: user.into(),
        }
    }

    #[test]
    fn marker_and_service_user_pass() {
        let config = HarnessConfig::default();
        env(Some("1"), "dockeruser").check(&config).unwrap();
    }

    #[test]
    fn missing_or_empty_marker_is_rejected() {
        let config = HarnessConfig::default();
        for marker in [None, Some("")] {
            let err = env(marker, "dockeruser").check(&config).unwrap_err();
            assert!(matches!(
                err,
                CiError::Environment(EnvironmentFault::MissingMarker { .. })
            ));
        }
    }

    #[test]
    fn wrong_user_is_distinguished_from_wrong_container() {
        let config = HarnessConfig::default();
        let err = env(Some("1"), "root").check(&config).unwrap_err();
        assert!(matches!(
            err,
            CiError::Environment(EnvironmentFault::WrongUser { ref actual, .. }) if actual == "root"
        ));
    }
}
