//! Running external collaborators one at a time

use crate::{CiError, CommandOutcome, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Exit code reported when a collaborator cannot be started at all, as a
/// shell would for an unknown command.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Placeholder values substituted into configured argument vectors.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl AsRef<Path>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &'static str, value: impl AsRef<Path>) {
        self.values
            .insert(key, value.as_ref().to_string_lossy().into_owned());
    }

    /// Replace every `{key}` in `args` with its value. Unknown keys are left
    /// untouched.
    #[must_use]
    pub fn expand(&self, args: &[String]) -> Vec<String> {
        args.iter()
            .map(|arg| {
                let mut out = arg.clone();
                for (key, value) in &self.values {
                    out = out.replace(&format!("{{{key}}}"), value);
                }
                out
            })
            .collect()
    }
}

/// Run `argv` in `cwd` with inherited stdio and fail on non-zero exit.
///
/// `context` labels the failure, e.g. the stage name.
pub fn run_checked(context: &str, argv: &[String], cwd: &Path) -> Result<CommandOutcome> {
    let outcome = spawn(context, argv, cwd, false)?;
    check(context, argv, outcome)
}

/// Run `argv` in `cwd`, capturing output. The output is echoed to our own
/// stdout/stderr so the run log stays complete. Exit status is not checked.
pub fn run_captured(context: &str, argv: &[String], cwd: &Path) -> Result<CommandOutcome> {
    let outcome = spawn(context, argv, cwd, true)?;
    std::io::stdout().write_all(&outcome.stdout)?;
    std::io::stderr().write_all(&outcome.stderr)?;
    Ok(outcome)
}

/// Turn a non-zero outcome into a collaborator failure.
pub fn check(context: &str, argv: &[String], outcome: CommandOutcome) -> Result<CommandOutcome> {
    if outcome.is_success() {
        return Ok(outcome);
    }
    tracing::error!(
        context,
        program = %program_name(argv),
        exit_code = outcome.exit_code,
        "collaborator failed"
    );
    Err(CiError::Collaborator {
        context: context.to_string(),
        program: program_name(argv),
        code: outcome.exit_code,
    })
}

fn spawn(context: &str, argv: &[String], cwd: &Path, capture: bool) -> Result<CommandOutcome> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CiError::Config(format!("{context}: empty command")))?;

    tracing::info!(context, cwd = %cwd.display(), command = %argv.join(" "), "running");
    let start = Instant::now();

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).stdin(Stdio::null());

    let result = if capture {
        command.output().map(|output| CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            duration: start.elapsed(),
        })
    } else {
        command.status().map(|status| CommandOutcome {
            exit_code: status.code().unwrap_or(-1),
            duration: start.elapsed(),
            ..CommandOutcome::default()
        })
    };

    match result {
        Ok(outcome) => {
            tracing::debug!(
                context,
                exit_code = outcome.exit_code,
                duration_ms = outcome.duration.as_millis(),
                "finished"
            );
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(context, program = %program, error = %e, "failed to start");
            Err(CiError::Collaborator {
                context: context.to_string(),
                program: program.clone(),
                code: SPAWN_FAILURE_CODE,
            })
        }
    }
}

fn program_name(argv: &[String]) -> String {
    argv.first().cloned().unwrap_or_default()
}
