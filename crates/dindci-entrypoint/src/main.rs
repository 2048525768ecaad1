//! entrypoint - container start-up hand-off
//!
//! Runs as root inside the dind container:
//! - grants the service user the group that owns the Docker socket
//! - drops to the target user and replaces itself with the requested command
//!
//! The command's exit status becomes the container's exit status.

use clap::{CommandFactory, Parser};
use dindci_core::privilege::{self, InvocationRequest, SystemGroups};
use dindci_core::{CiError, EntrypointConfig};
use std::convert::Infallible;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "entrypoint")]
#[command(version, about = "Fix docker socket access, then run a command as the service user")]
struct Args {
    /// User to run the command as (defaults to DINDCI_SERVICE_USER or dockeruser)
    #[arg(short, long)]
    user: Option<String>,

    /// Command to run, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing();

    let Err(err) = run(args);
    eprintln!("entrypoint: {err}");
    if matches!(err, CiError::Usage(_)) {
        eprintln!("{}", Args::command().render_usage());
    }
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "dindci=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> dindci_core::Result<Infallible> {
    privilege::require_root()?;
    let request = InvocationRequest::new(args.user, args.command)?;

    let config = EntrypointConfig::default();
    if let Some(plan) = privilege::resolve_socket_group(&mut SystemGroups, &config)? {
        tracing::info!(
            user = %config.service_user,
            group = %plan.group,
            changed = plan.needs_change,
            "docker socket group reconciled"
        );
    }

    privilege::exec_as(&request, &config.service_user)
}
