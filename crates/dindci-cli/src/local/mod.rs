//! Host-side launcher
//!
//! Snapshots the working tree into a commit, starts a privileged dind
//! container with the repository mounted read-only, builds the test images
//! inside it, runs `dindci test` and bundles the report archive with the
//! captured log under `.ci-reports/`.
//!
//! Ctrl-C abandons the run but still removes the container and the snapshot
//! ref.

mod docker;
mod images;
mod mounts;

use self::docker::{Docker, spawn_failure};
use self::images::ImageBuild;
use self::mounts::MountPlan;
use chrono::Utc;
use dindci_core::config::DEFAULT_SERVICE_USER;
use dindci_core::git::Git;
use dindci_core::report;
use dindci_core::snapshot;
use dindci_core::{CiError, Result};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

pub const DEFAULT_IMAGE: &str = "dind-dev";
pub const DEFAULT_IMAGES_DIR: &str = "test/resources/docker-images";

/// Exit status reported when the run is interrupted (128 + SIGINT)
pub const INTERRUPTED_CODE: i32 = 130;

const CONTAINER_HOME: &str = "/home/dockeruser";
const DIND_STATE: &str = "/var/lib/docker";
const UV_CACHE: &str = "/home/dockeruser/.cache/uv";
const UV_DATA: &str = "/home/dockeruser/.local/share/uv";
const BUNDLE_DIR: &str = ".ci-reports";

const READY_TIMEOUT: Duration = Duration::from_secs(90);
const READY_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub container_name: Option<String>,
    pub keep_container: bool,
    pub image: String,
    /// Image definitions, relative to the repository root
    pub images_dir: PathBuf,
}

/// `<dirname>_<8 hex chars of sha256(path)>`, stable per checkout location.
pub fn project_id(repo: &Path) -> String {
    let name = repo
        .file_name()
        .map_or_else(|| "repo".to_string(), |n| n.to_string_lossy().into_owned());
    let digest = Sha256::digest(repo.to_string_lossy().as_bytes());
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{name}_{}", &hex::encode(digest)[..8])
}

/// Named volumes for inner docker state and the uv caches
fn volumes(id: &str) -> [(String, &'static str); 3] {
    [
        (format!("{id}_lib_docker"), DIND_STATE),
        (format!("{id}_uv_cache"), UV_CACHE),
        (format!("{id}_uv_data"), UV_DATA),
    ]
}

pub async fn run(options: &LocalOptions) -> Result<i32> {
    for tool in ["docker", "git"] {
        require_tool(tool).await?;
    }

    let cwd = std::env::current_dir()?;
    let repo = Git::new(&cwd).toplevel()?;
    let mounts = MountPlan::new(&repo, mounts::detect(&repo)?.as_ref());
    let images = image_plan(&repo, &options.images_dir)?;

    let run_at = Utc::now();
    let stamp_ms = u128::try_from(run_at.timestamp_millis()).unwrap_or_default();
    let snapshot = snapshot::capture(&repo, stamp_ms)?;

    let id = project_id(&repo);
    let scratch = tempfile::tempdir()?;
    let launch = Launch {
        docker: Docker::default(),
        container: options.container_name.clone().unwrap_or_else(|| id.clone()),
        image: options.image.clone(),
        volumes: volumes(&id),
        overlay: mounts.write_overlay(scratch.path())?,
        mounts,
        images,
        repo,
        scratch: scratch.path().to_path_buf(),
    };
    tracing::info!(
        project = %id,
        container = %launch.container,
        commit = %snapshot.commit,
        source = %launch.mounts.source().display(),
        "launching local CI"
    );

    let result = interruptible(launch.run(&snapshot.commit), tokio::signal::ctrl_c()).await;

    if options.keep_container {
        println!("Container kept for debugging: {}", launch.container);
    } else {
        launch.docker.remove_container(&launch.container).await;
    }
    drop(snapshot);
    result
}

/// Run `work` unless `interrupt` fires first, in which case the run counts as
/// interrupted and `work` is dropped.
async fn interruptible<W, I>(work: W, interrupt: I) -> Result<i32>
where
    W: Future<Output = Result<i32>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(work);
    let signal = tokio::select! {
        result = &mut work => return result,
        signal = interrupt => signal,
    };
    match signal {
        Ok(()) => {
            println!("Interrupted; cleaning up.");
            Ok(INTERRUPTED_CODE)
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            work.await
        }
    }
}

/// Active images from `images_dir`, or nothing when the repository has none.
fn image_plan(repo: &Path, images_dir: &Path) -> Result<Vec<ImageBuild>> {
    let root = repo.join(images_dir);
    let climbs = images_dir.components().any(|c| c == Component::ParentDir);
    if climbs || !root.starts_with(repo) {
        return Err(CiError::Config(format!(
            "image directory {} is outside the repository",
            images_dir.display()
        )));
    }
    if !root.is_dir() {
        tracing::info!(dir = %root.display(), "no image definitions, using existing images");
        return Ok(Vec::new());
    }
    images::build_plan(&root)
}

/// Everything one local run needs once the snapshot exists
struct Launch {
    docker: Docker,
    container: String,
    image: String,
    volumes: [(String, &'static str); 3],
    mounts: MountPlan,
    overlay: Option<PathBuf>,
    images: Vec<ImageBuild>,
    repo: PathBuf,
    scratch: PathBuf,
}

impl Launch {
    async fn run(&self, commit: &str) -> Result<i32> {
        for (volume, _) in &self.volumes {
            self.docker.ensure_volume(volume).await?;
            self.docker.remove_containers_using(volume).await;
        }
        self.docker.remove_container(&self.container).await;

        self.build_host_image().await?;
        self.start_container().await?;
        self.wait_for_inner_docker().await?;
        self.build_inner_images().await?;
        self.drive(commit).await
    }

    async fn build_host_image(&self) -> Result<()> {
        let Some(host) = self.images.iter().find(|i| i.name == self.image) else {
            tracing::info!(image = %self.image, "no definition for host image, using existing");
            return Ok(());
        };
        println!("Building host image: {} ({})", host.name, host.dir.display());
        let dir = host.dir.display().to_string();
        self.docker
            .run(&["build", "-t", host.name.as_str(), dir.as_str()])
            .await?;
        Ok(())
    }

    async fn build_inner_images(&self) -> Result<()> {
        for image in self.images.iter().filter(|i| i.name != self.image) {
            let rel = image.dir.strip_prefix(&self.repo).map_err(|_| {
                CiError::Config(format!("{} is outside the repository", image.dir.display()))
            })?;
            let inner = self.mounts.source().join(rel);
            let inner = inner.display().to_string();
            println!("Building inner image: {} ({inner})", image.name);
            self.docker
                .run(&[
                    "exec",
                    "-u",
                    DEFAULT_SERVICE_USER,
                    self.container.as_str(),
                    "docker",
                    "build",
                    "-t",
                    image.name.as_str(),
                    inner.as_str(),
                ])
                .await?;
        }
        Ok(())
    }

    fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--privileged".into(),
            "-d".into(),
            "--name".into(),
            self.container.clone(),
        ];
        for (volume, target) in &self.volumes {
            args.push("-v".into());
            args.push(format!("{volume}:{target}"));
        }
        args.extend(self.mounts.volume_args(self.overlay.as_deref()));
        args.push(self.image.clone());
        args
    }

    async fn start_container(&self) -> Result<()> {
        let args = self.run_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker.run(&args).await?;

        let owner = format!("{DEFAULT_SERVICE_USER}:{DEFAULT_SERVICE_USER}");
        let cache = format!("{CONTAINER_HOME}/.cache");
        let data = format!("{CONTAINER_HOME}/.local");
        self.docker
            .run(&[
                "exec",
                self.container.as_str(),
                "chown",
                "-R",
                owner.as_str(),
                cache.as_str(),
                data.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn wait_for_inner_docker(&self) -> Result<()> {
        println!("Waiting for inner Docker daemon to start...");
        let container = self.container.as_str();
        let poll = async {
            loop {
                let output = self
                    .docker
                    .output(&["exec", "-u", DEFAULT_SERVICE_USER, container, "docker", "info"])
                    .await?;
                if output.status.success() {
                    return Ok::<(), CiError>(());
                }
                tokio::time::sleep(READY_POLL).await;
            }
        };
        tokio::time::timeout(READY_TIMEOUT, poll)
            .await
            .map_err(|_| {
                CiError::Config(format!(
                    "inner docker daemon in {container} not ready after {}s",
                    READY_TIMEOUT.as_secs()
                ))
            })??;
        println!("Inner Docker daemon is ready.");
        Ok(())
    }

    async fn drive(&self, commit: &str) -> Result<i32> {
        let log_path = self.scratch.join("ci_test.out");
        let run_at = Utc::now();
        let code = self.stream_harness(commit, &log_path).await?;
        if code != 0 {
            println!("CI exited with code {code}.");
        }

        let inner = self.fetch_archive().await;
        let bundle = report::assemble_bundle(
            &self.repo.join(BUNDLE_DIR),
            inner.as_deref(),
            &log_path,
            run_at,
            code == 0,
        )?;
        println!("Created report bundle: {}", bundle.display());
        Ok(code)
    }

    fn harness_args(&self, commit: &str) -> Vec<String> {
        let source = self.mounts.source().display().to_string();
        vec![
            "exec".into(),
            "--env".into(),
            "GIT_CONFIG_COUNT=1".into(),
            "--env".into(),
            "GIT_CONFIG_KEY_0=safe.directory".into(),
            "--env".into(),
            format!("GIT_CONFIG_VALUE_0={source}"),
            "-u".into(),
            DEFAULT_SERVICE_USER.into(),
            "-w".into(),
            CONTAINER_HOME.into(),
            self.container.clone(),
            "dindci".into(),
            "test".into(),
            commit.into(),
            "--source".into(),
            source,
        ]
    }

    /// Run the harness in the container, echoing and logging every line.
    async fn stream_harness(&self, commit: &str, log_path: &Path) -> Result<i32> {
        let args = self.harness_args(commit);
        println!("Running: docker {}", args.join(" "));

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut child = self
            .docker
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failure("docker", &e))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(BufReader::new(stdout), Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr), Stream::Stderr, tx));
        }

        let mut log = tokio::fs::File::create(log_path).await?;
        while let Some((stream, line)) = rx.recv().await {
            match stream {
                Stream::Stdout => println!("{line}"),
                Stream::Stderr => eprintln!("{line}"),
            }
            log.write_all(line.as_bytes()).await?;
            log.write_all(b"\n").await?;
        }
        log.flush().await?;

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(1))
    }

    /// Copy the newest report archive out of the container, if there is one.
    async fn fetch_archive(&self) -> Option<PathBuf> {
        let clone = self.mounts.clone_dir(Path::new(CONTAINER_HOME));
        let clone = clone.display();
        let list = format!("ls -1t {clone}/reports_*.tar.gz 2>/dev/null | head -n1");
        let found = self
            .docker
            .output(&["exec", self.container.as_str(), "sh", "-c", list.as_str()])
            .await
            .ok()?;
        let inner = String::from_utf8_lossy(&found.stdout).trim().to_string();
        if !found.status.success() || inner.is_empty() {
            println!("No reports archive found in {clone}.");
            return None;
        }

        let name = Path::new(&inner).file_name()?;
        let local = self.scratch.join(name);
        let source = format!("{}:{inner}", self.container);
        let target = local.to_string_lossy().into_owned();
        match self.docker.run(&["cp", source.as_str(), target.as_str()]).await {
            Ok(_) => Some(local),
            Err(e) => {
                println!("Could not copy reports archive: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn forward_lines<R: AsyncBufRead + Unpin>(
    mut reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if tx.send((stream, line.trim_end_matches(['\n', '\r']).to_string())).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(?stream, error = %e, "stopped reading harness output");
                break;
            }
        }
    }
}

async fn require_tool(tool: &str) -> Result<()> {
    let output = Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_failure(tool, &e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(CiError::Config(format!("`{tool} --version` failed; is {tool} installed?")))
    }
}
