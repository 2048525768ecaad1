//! Collaborator command outcomes

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of running one external collaborator to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Exit code of the process, -1 if it was killed by a signal
    pub exit_code: i32,

    /// Standard output (empty when stdio was inherited)
    pub stdout: Vec<u8>,

    /// Standard error (empty when stdio was inherited)
    pub stderr: Vec<u8>,

    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutcome {
    /// Get stdout as UTF-8 string, lossy conversion
    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Get stderr as UTF-8 string, lossy conversion
    #[must_use]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout followed by stderr, for log files
    #[must_use]
    pub fn combined(&self) -> Vec<u8> {
        let mut out = self.stdout.clone();
        out.extend_from_slice(&self.stderr);
        out
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl Default for CommandOutcome {
    fn default() -> Self {
        Self {
            exit_code: -1,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}
