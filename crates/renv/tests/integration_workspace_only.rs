//! `--no-container` runs against a local upstream repository
//!
//! These exercise the real git path end to end without a container runtime.
//! They are skipped when git is not installed.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn is_git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test User",
        ])
        .args(args)
        .output()
        .expect("git should run")
        .status;
    assert!(status.success(), "git {:?} failed", args);
}

struct Fixture {
    remotes: TempDir,
    root: TempDir,
}

impl Fixture {
    /// Upstream `acme/widgets` with a `tools/cli` subfolder and a `feature` branch
    fn new() -> Self {
        let remotes = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let repo = remotes.path().join("acme").join("widgets");
        fs::create_dir_all(repo.join("tools/cli")).unwrap();
        git(&repo, &["init"]);
        git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(repo.join("README.md"), "# widgets\n").unwrap();
        fs::write(repo.join("tools/cli/main.sh"), "echo hi\n").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-m", "initial"]);
        git(&repo, &["branch", "feature"]);
        Self { remotes, root }
    }

    fn renv(&self) -> Command {
        let mut cmd = Command::cargo_bin("renv").unwrap();
        cmd.env("RENV_DIR", self.root.path())
            .env(
                "RENV_REMOTE_TEMPLATE",
                format!("{}/{{owner}}/{{repo}}", self.remotes.path().display()),
            )
            .env_remove("RENV_CONFIG")
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }
}

fn stdout_path(output: &std::process::Output) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&output.stdout).trim())
}

#[test]
#[serial]
fn test_no_container_prints_workspace_path() {
    if !is_git_available() {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new();
    let output = fixture
        .renv()
        .args(["acme/widgets", "--no-container"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let path = stdout_path(&output);
    assert_eq!(path, fixture.path("acme/widgets/main/widgets"));
    assert!(path.join("README.md").exists());
    assert!(fixture.path(".cache/acme/widgets/.git").exists());
}

#[test]
#[serial]
fn test_no_container_subfolder_prints_subfolder_path() {
    if !is_git_available() {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new();
    let output = fixture
        .renv()
        .args(["acme/widgets@feature#tools/cli", "--no-container"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let path = stdout_path(&output);
    assert_eq!(
        path,
        fixture.path("acme/widgets/feature-sub-tools-cli/widgets/tools/cli")
    );
    assert!(path.join("main.sh").exists());
}

#[test]
#[serial]
fn test_missing_subfolder_exits_with_code_3() {
    if !is_git_available() {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new();
    fixture
        .renv()
        .args(["acme/widgets#missing/path", "--no-container"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("missing/path"));
    assert!(!fixture
        .path("acme/widgets/main-sub-missing-path/widgets")
        .exists());
}

#[test]
#[serial]
fn test_completion_helpers_read_cache() {
    if !is_git_available() {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new();
    fixture
        .renv()
        .args(["acme/widgets", "--no-container"])
        .assert()
        .success();

    fixture
        .renv()
        .arg("--complete-repos")
        .assert()
        .success()
        .stdout(predicate::str::diff("acme/widgets\n"));

    fixture
        .renv()
        .args(["--complete-branches", "acme/widgets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("feature"))
        .stdout(predicate::str::contains("main"));
}

#[test]
#[serial]
fn test_unreachable_remote_fails_cleanly() {
    if !is_git_available() {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new();
    fixture
        .renv()
        .args(["acme/nonexistent", "--no-container"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("clone"));
    assert!(!fixture.path("acme/nonexistent").exists());
}
