//! The command the entrypoint was asked to run

use crate::{CiError, Result};

/// A validated request: who to run as, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    user: Option<String>,
    command: Vec<String>,
}

impl InvocationRequest {
    /// Fails with a usage error when `command` is empty.
    pub fn new(user: Option<String>, command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(CiError::Usage("no command given".into()));
        }
        Ok(Self { user, command })
    }

    /// The user to hand off to
    #[must_use]
    pub fn target_user<'a>(&'a self, default: &'a str) -> &'a str {
        self.user.as_deref().unwrap_or(default)
    }

    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }
}
