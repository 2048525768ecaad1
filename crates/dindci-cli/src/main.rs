//! dindci - run the CI pipeline inside a dind container, or launch it from
//! the host

use clap::{Parser, Subcommand};
use dindci_core::HarnessConfig;
use dindci_core::pipeline::{self, HostEnvironment, PipelineOptions};
use dindci_core::snapshot;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod local;

#[derive(Parser)]
#[command(name = "dindci")]
#[command(version, about = "Reproducible CI runs inside Docker-in-Docker containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against a fresh clone (inside the CI container)
    Test {
        /// Commit to test (defaults to what the source has checked out)
        commit: Option<String>,

        /// Repository to clone from
        #[arg(short, long, default_value = ".")]
        source: PathBuf,

        /// Harness configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip building and install-checking the wheel
        #[arg(long)]
        skip_packaging: bool,
    },

    /// Snapshot the working tree and run the pipeline in a dind container
    Local {
        /// Container name (defaults to the project identity)
        #[arg(long)]
        container_name: Option<String>,

        /// Leave the container running afterwards for debugging
        #[arg(long)]
        keep_container: bool,

        /// Image to start
        #[arg(long, default_value = local::DEFAULT_IMAGE)]
        image: String,

        /// Directory of image definitions (`*/image_info.json`), relative to
        /// the repository root
        #[arg(long, default_value = local::DEFAULT_IMAGES_DIR)]
        images_dir: PathBuf,
    },

    /// Print the tree hash of the current working tree
    TreeHash {
        /// Do not keep the objects written while hashing
        #[arg(long)]
        ephemeral: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Test {
            commit,
            source,
            config,
            skip_packaging,
        } => run_test(commit, source, config, skip_packaging),

        Commands::Local {
            container_name,
            keep_container,
            image,
            images_dir,
        } => run_local(local::LocalOptions {
            container_name,
            keep_container,
            image,
            images_dir,
        }),

        Commands::TreeHash { ephemeral } => std::env::current_dir()
            .map_err(Into::into)
            .and_then(|cwd| snapshot::working_tree_hash(&cwd, ephemeral))
            .map(|hash| {
                println!("{hash}");
                0
            }),
    };

    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("dindci: {e}");
            exit_code(e.exit_code())
        }
    }
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

fn run_test(
    commit: Option<String>,
    source: PathBuf,
    config: Option<PathBuf>,
    skip_packaging: bool,
) -> dindci_core::Result<i32> {
    let config = HarnessConfig::load(config.as_deref())?;
    let env = HostEnvironment::capture(&config.ci_marker_var)?;
    let source = std::path::absolute(&source)?;
    let options = PipelineOptions {
        source,
        commit,
        skip_packaging,
    };

    let archive = pipeline::run(&options, &config, &env)?;
    println!("{}", archive.path.display());
    Ok(0)
}

fn run_local(options: local::LocalOptions) -> dindci_core::Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(local::run(&options))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_byte(code))
}

/// Codes outside `0..=255` cannot be reported faithfully; they become 1.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
