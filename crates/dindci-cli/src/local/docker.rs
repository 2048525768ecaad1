//! docker CLI invocations
//!
//! Housekeeping calls (stale containers, volume reuse) are best-effort: a
//! failure there is logged and the launch carries on.

use dindci_core::process::SPAWN_FAILURE_CODE;
use dindci_core::{CiError, Result};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// How to reach the docker CLI
#[derive(Debug, Clone)]
pub struct Docker {
    program: String,
    prefix: Vec<String>,
}

impl Default for Docker {
    fn default() -> Self {
        Self {
            program: "docker".into(),
            prefix: Vec::new(),
        }
    }
}

impl Docker {
    /// A shell script standing in for docker.
    #[cfg(test)]
    pub fn scripted(script: &std::path::Path) -> Self {
        Self {
            program: "sh".into(),
            prefix: vec![script.to_string_lossy().into_owned()],
        }
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix).args(args).stdin(Stdio::null());
        cmd
    }

    pub async fn output(&self, args: &[&str]) -> Result<Output> {
        self.command(args)
            .output()
            .await
            .map_err(|e| spawn_failure(&self.program, &e))
    }

    /// Run docker and return trimmed stdout, failing on non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let sub = args.first().copied().unwrap_or_default();
        tracing::error!(
            subcommand = %sub,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "docker failed"
        );
        Err(CiError::Collaborator {
            context: format!("docker {sub}"),
            program: "docker".into(),
            code: output.status.code().unwrap_or(-1),
        })
    }

    pub async fn ensure_volume(&self, volume: &str) -> Result<()> {
        if self.output(&["volume", "inspect", volume]).await?.status.success() {
            return Ok(());
        }
        tracing::info!(%volume, "creating volume");
        self.run(&["volume", "create", volume]).await?;
        Ok(())
    }

    /// Remove every container (running or not) that mounts `volume`.
    pub async fn remove_containers_using(&self, volume: &str) {
        let filter = format!("volume={volume}");
        let ids = match self.run(&["ps", "-aq", "--filter", filter.as_str()]).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(%volume, error = %e, "could not list containers using volume");
                return;
            }
        };
        for id in ids.lines().filter(|l| !l.is_empty()) {
            println!("Removing container {id} (uses volume {volume}).");
            if let Err(e) = self.run(&["rm", "-f", id]).await {
                tracing::warn!(container = %id, error = %e, "could not remove container");
            }
        }
    }

    /// Remove a container if present, ignoring failures.
    pub async fn remove_container(&self, container: &str) {
        if let Err(e) = self.output(&["rm", "-f", container]).await {
            tracing::debug!(%container, error = %e, "container removal skipped");
        }
    }
}

pub fn spawn_failure(program: &str, err: &std::io::Error) -> CiError {
    tracing::error!(program, error = %err, "failed to start");
    CiError::Collaborator {
        context: "local".into(),
        program: program.into(),
        code: SPAWN_FAILURE_CODE,
    }
}
