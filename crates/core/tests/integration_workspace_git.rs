//! Workspace preparation against real git repositories on the local filesystem
//!
//! Each test builds an upstream repository under a temp directory and points the
//! remote template at it. Tests are skipped when git is not installed.

use renv_core::errors::{GitError, RenvError};
use renv_core::git::{is_git_available, CliGit};
use renv_core::repo_spec::RepoSpec;
use renv_core::workspace::WorkspaceManager;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test User",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Upstream `owner/repo` with `a/b`, `a/x`, `c` on `main` and a `feature` branch
fn upstream(remotes: &Path, default_branch: &str) -> PathBuf {
    let repo = remotes.join("owner").join("repo");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init"]);
    git(&repo, &["symbolic-ref", "HEAD", &format!("refs/heads/{}", default_branch)]);
    write(&repo.join("README.md"), "# repo\n");
    write(&repo.join("a/b/inner.txt"), "inner\n");
    write(&repo.join("a/x.txt"), "sibling\n");
    write(&repo.join("c/other.txt"), "other\n");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "initial"]);

    git(&repo, &["checkout", "-b", "feature"]);
    write(&repo.join("feature.txt"), "feature\n");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "feature work"]);
    git(&repo, &["checkout", default_branch]);
    repo
}

struct Fixture {
    _remotes: TempDir,
    _root: TempDir,
    manager: WorkspaceManager<CliGit>,
}

impl Fixture {
    fn new(default_branch: &str) -> Self {
        let remotes = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        upstream(remotes.path(), default_branch);
        let template = format!("{}/{{owner}}/{{repo}}", remotes.path().display());
        let manager = WorkspaceManager::new(CliGit::new(), root.path()).with_remote_template(template);
        Self {
            _remotes: remotes,
            _root: root,
            manager,
        }
    }

    async fn resolve(&self, input: &str) -> RepoSpec {
        let spec = RepoSpec::parse(input).unwrap();
        let cache = self.manager.ensure_cache(&spec).await.unwrap();
        if spec.branch_explicit {
            spec
        } else {
            let branch = self.manager.default_branch(&cache).await.unwrap();
            spec.with_default_branch(&branch)
        }
    }
}

fn current_branch(dir: &Path) -> String {
    git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

fn has_upstream(dir: &Path) -> bool {
    Command::new("git")
        .current_dir(dir)
        .args(["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_default_branch_detected_from_remote_head() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("develop");
    let spec = fixture.resolve("owner/repo").await;
    assert_eq!(spec.branch, "develop");

    let ws = fixture.manager.ensure_workspace(&spec).await.unwrap();
    assert!(ws.created);
    assert_eq!(current_branch(&ws.root), "develop");
}

#[tokio::test]
async fn test_remote_branch_is_tracked() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let spec = fixture.resolve("owner/repo@feature").await;
    let ws = fixture.manager.ensure_workspace(&spec).await.unwrap();

    assert_eq!(current_branch(&ws.root), "feature");
    assert!(has_upstream(&ws.root));
    assert!(ws.root.join("feature.txt").exists());

    // Second run reuses the local branch
    let again = fixture.manager.ensure_workspace(&spec).await.unwrap();
    assert!(!again.created);
    assert_eq!(current_branch(&again.root), "feature");
}

#[tokio::test]
async fn test_unknown_branch_created_from_default() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let spec = fixture.resolve("owner/repo@brand-new").await;
    let ws = fixture.manager.ensure_workspace(&spec).await.unwrap();

    assert_eq!(current_branch(&ws.root), "brand-new");
    assert!(!has_upstream(&ws.root));
    assert!(ws.root.join("README.md").exists());
    assert!(!ws.root.join("feature.txt").exists());
}

#[tokio::test]
async fn test_local_cache_branch_wins() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let spec = fixture.resolve("owner/repo@local-only").await;
    let cache = fixture.manager.cache_dir(&spec);
    git(&cache, &["branch", "local-only", "origin/feature"]);

    let ws = fixture.manager.ensure_workspace(&spec).await.unwrap();
    assert_eq!(current_branch(&ws.root), "local-only");
    assert!(ws.root.join("feature.txt").exists());
}

#[tokio::test]
async fn test_subfolder_sparse_checkout_is_isolated() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let sub = fixture.resolve("owner/repo@main#a/b").await;
    let full = fixture.resolve("owner/repo@main").await;

    let sub_ws = fixture.manager.ensure_workspace(&sub).await.unwrap();
    let full_ws = fixture.manager.ensure_workspace(&full).await.unwrap();

    assert_ne!(sub_ws.root, full_ws.root);
    assert_eq!(sub_ws.work_dir, sub_ws.root.join("a/b"));
    assert!(sub_ws.work_dir.join("inner.txt").exists());
    assert!(!sub_ws.root.join("c").exists());
    assert!(!sub_ws.root.join("a/x.txt").exists());
    assert!(!sub_ws.root.join("README.md").exists());

    // The sparse copy leaves the full one untouched
    assert!(full_ws.root.join("c/other.txt").exists());
    assert!(full_ws.root.join("a/b/inner.txt").exists());
}

#[tokio::test]
async fn test_subfolder_copy_is_clean_as_mounted() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let sub = fixture.resolve("owner/repo@main#a/b").await;
    let ws = fixture.manager.ensure_workspace(&sub).await.unwrap();

    // The container mounts `root` and starts in `work_dir`
    assert_eq!(git(&ws.root, &["status", "--porcelain"]), "");
    assert_eq!(git(&ws.work_dir, &["status", "--porcelain"]), "");

    fs::write(ws.work_dir.join("inner.txt"), "edited\n").unwrap();
    assert_eq!(
        git(&ws.work_dir, &["status", "--porcelain"]),
        "M a/b/inner.txt"
    );
}

#[tokio::test]
async fn test_missing_subfolder_leaves_no_workspace() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let spec = fixture.resolve("owner/repo@main#does/not/exist").await;
    let err = fixture.manager.ensure_workspace(&spec).await.unwrap_err();

    assert!(matches!(
        err,
        RenvError::Git(GitError::SubfolderNotFound { ref path }) if path == "does/not/exist"
    ));
    assert_eq!(err.exit_code(), 3);
    assert!(!fixture.manager.workspace_dir(&spec).exists());
}

#[tokio::test]
async fn test_cached_branches_lists_remote_branches() {
    if !is_git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }
    let fixture = Fixture::new("main");
    let spec = fixture.resolve("owner/repo").await;
    let branches = fixture.manager.cached_branches(&spec).await.unwrap();
    assert_eq!(branches, vec!["feature".to_string(), "main".to_string()]);
}
