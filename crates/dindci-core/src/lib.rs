//! # dindci-core
//!
//! Privilege hand-off and CI pipeline primitives for Docker-in-Docker
//! development containers.
//!
//! This crate provides:
//! - Docker socket group reconciliation and user hand-off (`privilege`)
//! - A type-state clone → verify → package → test pipeline (`pipeline`)
//! - Report archives named by date and git tree hash (`report`)
//! - Working-tree snapshots for testing uncommitted work (`snapshot`)

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod git;
pub mod pipeline;
pub mod privilege;
pub mod process;
pub mod report;
pub mod result;
pub mod snapshot;

pub use config::{EntrypointConfig, HarnessConfig};
pub use error::{CiError, EnvironmentFault};
pub use result::CommandOutcome;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, CiError>;
