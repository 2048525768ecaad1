//! Shared fixtures: throwaway git repositories and scripted collaborators.

#![allow(dead_code)]

use dindci_core::HarnessConfig;
use dindci_core::config::CommandSet;
use dindci_core::pipeline::HostEnvironment;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository with one commit containing `x.py` and a `.gitignore` for
/// everything the pipeline writes.
pub fn source_repo(root: &Path) -> PathBuf {
    let repo = root.join("source");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["config", "user.name", "CI Test"]);
    git(&repo, &["config", "user.email", "ci@example.invalid"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(
        repo.join(".gitignore"),
        "reports/\ndist/\n*.tar.gz\n.*.partial\n",
    )
    .unwrap();
    std::fs::write(repo.join("x.py"), "x=1\n").unwrap();
    commit_all(&repo, "initial");
    repo
}

pub fn commit_all(repo: &Path, message: &str) -> String {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "--quiet", "-m", message]);
    git(repo, &["rev-parse", "HEAD"])
}

pub fn sh(script: &str, args: &[&str]) -> Vec<String> {
    let mut argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    argv.extend(args.iter().map(|s| (*s).to_string()));
    argv
}

/// Collaborators that append their name to `log` and produce the files the
/// real tools would.
pub fn scripted_commands(log: &Path) -> CommandSet {
    let log = log.display();
    CommandSet {
        sync: sh(&format!("echo sync >> {log}"), &[]),
        lint: sh(&format!("echo lint >> {log}; echo linted"), &[]),
        build: sh(
            &format!(
                "mkdir -p \"$0\" && touch \"$0/pkg-0.1.0-py3-none-any.whl\" && echo build >> {log}"
            ),
            &["{dist}"],
        ),
        create_venv: sh(
            "mkdir -p \"$0/bin\" && printf '#!/bin/sh\\n' > \"$0/bin/python\" && chmod +x \"$0/bin/python\"",
            &["{venv}"],
        ),
        install: sh(
            &format!("test -x \"$0\" && test -f \"$1\" && echo \"install $(basename \"$1\")\" >> {log}"),
            &["{python}", "{wheel}"],
        ),
        sanity: sh(&format!("test -x \"$0\" && echo sanity >> {log}"), &["{python}"]),
        aux_tests: sh(
            &format!("echo aux >> {log} && echo '<aux/>' > \"$0/aux-junit.xml\""),
            &["{reports}"],
        ),
        tests: sh(
            &format!("echo tests >> {log} && echo '<coverage/>' > \"$0/coverage.xml\""),
            &["{reports}"],
        ),
    }
}

pub fn config(root: &Path, commands: CommandSet) -> HarnessConfig {
    HarnessConfig {
        clone_dir: Some(root.join("clone")),
        packaging_clone_dir: Some(root.join("clone-packaging")),
        commands,
        ..HarnessConfig::default()
    }
}

pub fn ci_env() -> HostEnvironment {
    HostEnvironment {
        ci_marker: Some("1".into()),
        user: "dockeruser".into(),
    }
}

pub fn read_log(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn archives_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            name.starts_with("reports_") && name.ends_with(".tar.gz")
        })
        .collect()
}
