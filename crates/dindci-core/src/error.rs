//! Error types for dindci-core

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("privilege error: {0}")]
    Privilege(String),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentFault),

    #[error("working tree at {path} is not clean after {checkpoint}:\n{status}")]
    DirtyTree {
        path: PathBuf,
        checkpoint: String,
        status: String,
    },

    #[error("formatter changed {} file(s); run the formatter before pushing:\n{}", files.len(), files.join("\n"))]
    FormattingDrift { files: Vec<String> },

    #[error("{context}: `{program}` exited with code {code}")]
    Collaborator {
        context: String,
        program: String,
        code: i32,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}

/// Pre-flight failures of the harness, kept apart so the caller can tell
/// "wrong container" from "wrong identity".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentFault {
    #[error("not a CI container: ${var} is not set")]
    MissingMarker { var: String },

    #[error("must run as `{expected}`, running as `{actual}`")]
    WrongUser { expected: String, actual: String },
}

impl CiError {
    /// Process exit status for this error.
    ///
    /// Collaborator failures propagate the tool's own code; a tool killed by a
    /// signal (reported as -1) and every other error map to 1.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Collaborator { code, .. } if *code > 0 => *code,
            _ => 1,
        }
    }
}
