//! Cache and workspace management
//!
//! One fetch-only cache clone per repository lives under `{root}/.cache`. Each
//! (branch, subfolder) pair gets an independent full copy of that cache, so every
//! workspace is a plain non-worktree git repository that any tool recognizes.
//!
//! Nothing here retries. Git failures carry the operation and directory and are
//! returned to the caller.

use crate::errors::{GitError, RenvError, Result};
use crate::git::Vcs;
use crate::naming;
use crate::repo_spec::{RepoSpec, DEFAULT_BRANCH};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Default remote URL template
pub const DEFAULT_REMOTE_TEMPLATE: &str = "git@github.com:{owner}/{repo}.git";

/// A prepared workspace copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceDir {
    /// Root of the git repository copy
    pub root: PathBuf,
    /// Directory the user works in (`root` or `root/subfolder`)
    pub work_dir: PathBuf,
    /// Whether this invocation created the copy
    pub created: bool,
}

/// An environment found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentEntry {
    pub owner: String,
    pub repo: String,
    /// Branch directory name (`{safe_branch}[-sub-{safe_subfolder}]`)
    pub segment: String,
    pub path: PathBuf,
}

impl EnvironmentEntry {
    /// Container name this workspace maps to
    pub fn container_name(&self) -> String {
        naming::container_name_for_segment(&self.repo, &self.segment)
    }
}

/// Maintains caches and workspace copies under a root directory
#[derive(Debug)]
pub struct WorkspaceManager<G: Vcs> {
    vcs: G,
    root: PathBuf,
    remote_template: String,
}

impl<G: Vcs> WorkspaceManager<G> {
    pub fn new(vcs: G, root: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            root: root.into(),
            remote_template: DEFAULT_REMOTE_TEMPLATE.to_string(),
        }
    }

    /// Override the `{owner}`/`{repo}` remote URL template
    pub fn with_remote_template(mut self, template: impl Into<String>) -> Self {
        self.remote_template = template.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vcs(&self) -> &G {
        &self.vcs
    }

    /// Remote URL for a repository, from the owner and repo as typed
    pub fn remote_url(&self, spec: &RepoSpec) -> String {
        let (owner, repo) = &spec.upstream;
        self.remote_template
            .replace("{owner}", owner)
            .replace("{repo}", repo)
    }

    pub fn cache_dir(&self, spec: &RepoSpec) -> PathBuf {
        naming::cache_dir(spec, &self.root)
    }

    pub fn workspace_dir(&self, spec: &RepoSpec) -> PathBuf {
        naming::workspace_dir(spec, &self.root)
    }

    /// Clone the cache if absent, otherwise fetch and fast-forward it.
    /// Submodules are updated after every sync.
    #[instrument(skip(self), fields(repo = %spec.slug()))]
    pub async fn ensure_cache(&self, spec: &RepoSpec) -> Result<PathBuf> {
        let cache = self.cache_dir(spec);
        if cache.join(".git").exists() {
            debug!("Updating cache at {}", cache.display());
            self.vcs.fetch(&cache).await?;
            if self.vcs.is_clean(&cache).await? && self.vcs.has_upstream(&cache).await? {
                self.vcs.pull_ff_only(&cache).await?;
            } else {
                warn!(
                    "Cache {} has local changes or no upstream; skipping fast-forward",
                    cache.display()
                );
            }
        } else {
            if cache.exists() {
                // Leftover from an interrupted clone
                std::fs::remove_dir_all(&cache).map_err(|e| RenvError::io(&cache, e))?;
            }
            let url = self.remote_url(spec);
            info!("Cloning {} into {}", url, cache.display());
            self.vcs.clone_repo(&url, &cache).await?;
        }
        self.vcs.submodule_update(&cache).await?;
        Ok(cache)
    }

    /// Default branch of the repository behind `repo_dir`.
    ///
    /// The remote's advertised `HEAD` wins; otherwise `main` then `master` are
    /// tried as remote-tracking refs, falling back to `main`.
    pub async fn default_branch(&self, repo_dir: &Path) -> Result<String> {
        if let Some(head) = self.vcs.remote_head(repo_dir).await? {
            return Ok(head);
        }
        for candidate in [DEFAULT_BRANCH, "master"] {
            let reference = format!("refs/remotes/origin/{}", candidate);
            if self.vcs.verify_ref(repo_dir, &reference).await? {
                return Ok(candidate.to_string());
            }
        }
        Ok(DEFAULT_BRANCH.to_string())
    }

    /// Materialize the workspace copy for `spec` and check out its branch.
    ///
    /// `spec` must already carry its resolved branch. The cache must exist.
    #[instrument(skip(self), fields(spec = %spec))]
    pub async fn ensure_workspace(&self, spec: &RepoSpec) -> Result<WorkspaceDir> {
        let cache = self.cache_dir(spec);
        let dir = self.workspace_dir(spec);
        let created = !dir.join(".git").exists();

        if created {
            info!("Creating workspace {} from cache", dir.display());
            copy_repository(&cache, &dir)?;
        } else {
            debug!("Reusing workspace {}", dir.display());
            self.vcs.fetch(&dir).await?;
        }

        let result = self.prepare_checkout(spec, &dir, !created).await;
        if let Err(e) = result {
            if created {
                // A half-prepared copy must not be mistaken for a valid workspace next time
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    warn!("Failed to clean up {}: {}", dir.display(), cleanup);
                }
                remove_empty_segment(&dir);
            }
            return Err(e);
        }

        let work_dir = match &spec.subfolder {
            Some(sub) => dir.join(sub),
            None => dir.clone(),
        };
        Ok(WorkspaceDir {
            root: dir,
            work_dir,
            created,
        })
    }

    async fn prepare_checkout(&self, spec: &RepoSpec, dir: &Path, fast_forward: bool) -> Result<()> {
        let default_branch = self.default_branch(dir).await?;
        self.resolve_branch(dir, &spec.branch, &default_branch)
            .await?;

        if fast_forward && self.vcs.is_clean(dir).await? && self.vcs.has_upstream(dir).await? {
            self.vcs.pull_ff_only(dir).await?;
            self.vcs.submodule_update(dir).await?;
        }

        if let Some(sub) = &spec.subfolder {
            if !self.vcs.path_exists(dir, sub).await? {
                return Err(GitError::SubfolderNotFound { path: sub.clone() }.into());
            }
            self.vcs.sparse_checkout_set(dir, &[sub.clone()]).await?;
        }
        Ok(())
    }

    /// Check out `branch`: an existing local branch first, then a remote-tracking
    /// branch (tracked), then a new branch from the upstream default branch when
    /// that ref exists, else from `HEAD`.
    pub async fn resolve_branch(&self, dir: &Path, branch: &str, default_branch: &str) -> Result<()> {
        if self
            .vcs
            .verify_ref(dir, &format!("refs/heads/{}", branch))
            .await?
        {
            return self.vcs.checkout(dir, branch).await;
        }

        let remote_ref = format!("refs/remotes/origin/{}", branch);
        if self.vcs.verify_ref(dir, &remote_ref).await? {
            return self
                .vcs
                .checkout_tracking(dir, branch, &format!("origin/{}", branch))
                .await;
        }

        let default_ref = format!("refs/remotes/origin/{}", default_branch);
        let start_point = if self.vcs.verify_ref(dir, &default_ref).await? {
            format!("origin/{}", default_branch)
        } else {
            "HEAD".to_string()
        };
        info!("Creating new branch {} from {}", branch, start_point);
        self.vcs.create_branch(dir, branch, &start_point).await
    }

    /// Delete the workspace copy for `spec`. The cache is kept.
    pub fn remove_workspace(&self, spec: &RepoSpec) -> Result<bool> {
        let dir = self.workspace_dir(spec);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| RenvError::io(&dir, e))?;
        remove_empty_segment(&dir);
        Ok(true)
    }

    /// Branch names known to the cache of `spec`'s repository
    pub async fn cached_branches(&self, spec: &RepoSpec) -> Result<Vec<String>> {
        let cache = self.cache_dir(spec);
        if !cache.join(".git").exists() {
            return Ok(Vec::new());
        }
        self.vcs.list_branches(&cache).await
    }
}

/// Drop the `{segment}` directory holding `dir` once nothing else is in it
fn remove_empty_segment(dir: &Path) {
    if let Some(segment) = dir.parent() {
        // Fails harmlessly when the segment still has content
        let _ = std::fs::remove_dir(segment);
    }
}

/// `owner/repo` pairs that have a cache under `root`
pub fn list_cached_repos(root: &Path) -> Result<Vec<String>> {
    let cache_root = root.join(".cache");
    let mut repos = Vec::new();
    for owner in sorted_subdirs(&cache_root)? {
        for repo in sorted_subdirs(&cache_root.join(&owner))? {
            repos.push(format!("{}/{}", owner, repo));
        }
    }
    Ok(repos)
}

/// Workspace copies found under `root`
pub fn list_environments(root: &Path) -> Result<Vec<EnvironmentEntry>> {
    let mut entries = Vec::new();
    for owner in sorted_subdirs(root)? {
        if owner.starts_with('.') {
            continue;
        }
        let owner_dir = root.join(&owner);
        for repo in sorted_subdirs(&owner_dir)? {
            let repo_dir = owner_dir.join(&repo);
            for segment in sorted_subdirs(&repo_dir)? {
                let path = repo_dir.join(&segment).join(&repo);
                if path.join(".git").exists() {
                    entries.push(EnvironmentEntry {
                        owner: owner.clone(),
                        repo: repo.clone(),
                        segment,
                        path,
                    });
                }
            }
        }
    }
    Ok(entries)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| RenvError::io(dir, e))? {
        let entry = entry.map_err(|e| RenvError::io(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Copy a repository directory (including `.git`) to `dst`.
///
/// The copy is staged next to `dst` and renamed into place, so an interrupted
/// copy never leaves a directory that looks like a complete workspace.
pub fn copy_repository(src: &Path, dst: &Path) -> Result<()> {
    if !src.join(".git").exists() {
        return Err(GitError::CommandFailed {
            operation: "copy".to_string(),
            dir: src.to_path_buf(),
            message: "cache is not a git repository".to_string(),
        }
        .into());
    }
    let parent = dst.parent().unwrap_or(dst);
    std::fs::create_dir_all(parent).map_err(|e| RenvError::io(parent, e))?;

    let mut staging = dst.as_os_str().to_owned();
    staging.push(".partial");
    let staging = PathBuf::from(staging);
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| RenvError::io(&staging, e))?;
    }

    if let Err(e) = copy_dir_all(src, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(RenvError::io(src, e));
    }
    std::fs::rename(&staging, dst).map_err(|e| RenvError::io(dst, e))?;
    Ok(())
}

/// Recursive copy that recreates symlinks instead of following them
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> std::io::Result<()> {
    std::fs::create_dir_all(&dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let target = dst.as_ref().join(entry.file_name());
        if ty.is_dir() {
            copy_dir_all(entry.path(), target)?;
        } else if ty.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::mock::{MockRemoteFailure, MockVcs};
    use tempfile::TempDir;

    fn spec(s: &str) -> RepoSpec {
        RepoSpec::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_cache_clones_when_absent() {
        let root = TempDir::new().unwrap();
        let vcs = MockVcs::new();
        let manager = WorkspaceManager::new(vcs.clone(), root.path());

        let cache = manager.ensure_cache(&spec("o/r")).await.unwrap();
        assert_eq!(cache, root.path().join(".cache/o/r"));
        assert_eq!(
            vcs.calls(),
            vec!["clone git@github.com:o/r.git", "submodule_update"]
        );
    }

    #[tokio::test]
    async fn test_ensure_cache_fetches_and_fast_forwards_when_present() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".cache/o/r/.git")).unwrap();
        let vcs = MockVcs::new();
        let manager = WorkspaceManager::new(vcs.clone(), root.path());

        manager.ensure_cache(&spec("o/r")).await.unwrap();
        assert_eq!(vcs.calls(), vec!["fetch", "pull", "submodule_update"]);
    }

    #[tokio::test]
    async fn test_ensure_cache_skips_pull_when_dirty() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".cache/o/r/.git")).unwrap();
        let vcs = MockVcs::new().with_dirty_tree();
        let manager = WorkspaceManager::new(vcs.clone(), root.path());

        manager.ensure_cache(&spec("o/r")).await.unwrap();
        assert_eq!(vcs.calls(), vec!["fetch", "submodule_update"]);
    }

    #[tokio::test]
    async fn test_ensure_cache_network_error_propagates() {
        let root = TempDir::new().unwrap();
        let vcs = MockVcs::new().with_remote_failure(MockRemoteFailure::Network);
        let manager = WorkspaceManager::new(vcs, root.path());

        let err = manager.ensure_cache(&spec("o/r")).await.unwrap_err();
        assert!(matches!(err, RenvError::Git(GitError::Network { .. })));
    }

    #[tokio::test]
    async fn test_remote_template() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(MockVcs::new(), root.path())
            .with_remote_template("file:///srv/{owner}/{repo}");
        assert_eq!(manager.remote_url(&spec("a/b")), "file:///srv/a/b");
    }

    #[tokio::test]
    async fn test_resolve_branch_prefers_local() {
        let vcs = MockVcs::new()
            .with_ref("refs/heads/dev")
            .with_ref("refs/remotes/origin/dev");
        let manager = WorkspaceManager::new(vcs.clone(), "/unused");
        manager
            .resolve_branch(Path::new("/w"), "dev", "main")
            .await
            .unwrap();
        assert_eq!(vcs.calls_to("checkout"), vec!["checkout dev"]);
        assert!(vcs.calls_to("checkout_tracking").is_empty());
        assert!(!vcs
            .calls()
            .contains(&"verify_ref refs/remotes/origin/dev".to_string()));
    }

    #[tokio::test]
    async fn test_resolve_branch_tracks_remote() {
        let vcs = MockVcs::new().with_ref("refs/remotes/origin/dev");
        let manager = WorkspaceManager::new(vcs.clone(), "/unused");
        manager
            .resolve_branch(Path::new("/w"), "dev", "main")
            .await
            .unwrap();
        assert_eq!(
            vcs.calls_to("checkout_tracking"),
            vec!["checkout_tracking dev origin/dev"]
        );
    }

    #[tokio::test]
    async fn test_resolve_branch_creates_from_upstream_default() {
        let vcs = MockVcs::new().with_ref("refs/remotes/origin/trunk");
        let manager = WorkspaceManager::new(vcs.clone(), "/unused");
        manager
            .resolve_branch(Path::new("/w"), "feature/x", "trunk")
            .await
            .unwrap();
        assert_eq!(
            vcs.calls_to("create_branch"),
            vec!["create_branch feature/x origin/trunk"]
        );
    }

    #[tokio::test]
    async fn test_resolve_branch_never_fabricates_tracking() {
        let vcs = MockVcs::new();
        let manager = WorkspaceManager::new(vcs.clone(), "/unused");
        manager
            .resolve_branch(Path::new("/w"), "new", "main")
            .await
            .unwrap();
        assert_eq!(vcs.calls_to("create_branch"), vec!["create_branch new HEAD"]);
        assert!(vcs.calls_to("checkout_tracking").is_empty());
    }

    #[tokio::test]
    async fn test_default_branch_detection() {
        let manager = WorkspaceManager::new(MockVcs::new().with_remote_head("develop"), "/unused");
        assert_eq!(manager.default_branch(Path::new("/c")).await.unwrap(), "develop");

        let manager = WorkspaceManager::new(
            MockVcs::new().with_ref("refs/remotes/origin/master"),
            "/unused",
        );
        assert_eq!(manager.default_branch(Path::new("/c")).await.unwrap(), "master");

        let manager = WorkspaceManager::new(MockVcs::new(), "/unused");
        assert_eq!(manager.default_branch(Path::new("/c")).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_ensure_workspace_copies_cache() {
        let root = TempDir::new().unwrap();
        let cache = root.path().join(".cache/o/r");
        std::fs::create_dir_all(cache.join(".git")).unwrap();
        std::fs::write(cache.join("README.md"), "hi").unwrap();

        let vcs = MockVcs::new().with_ref("refs/heads/main");
        let manager = WorkspaceManager::new(vcs.clone(), root.path());
        let ws = manager.ensure_workspace(&spec("o/r@main")).await.unwrap();

        assert!(ws.created);
        assert_eq!(ws.root, root.path().join("o/r/main/r"));
        assert_eq!(ws.work_dir, ws.root);
        assert!(ws.root.join(".git").is_dir());
        assert_eq!(std::fs::read_to_string(ws.root.join("README.md")).unwrap(), "hi");
        assert!(vcs.calls_to("fetch").is_empty());

        // Second call reuses the copy and only syncs it
        let ws = manager.ensure_workspace(&spec("o/r@main")).await.unwrap();
        assert!(!ws.created);
        assert_eq!(vcs.calls_to("fetch"), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_ensure_workspace_missing_subfolder_fails_and_cleans_up() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".cache/o/r/.git")).unwrap();
        let vcs = MockVcs::new().with_ref("refs/heads/main");
        let manager = WorkspaceManager::new(vcs.clone(), root.path());

        let s = spec("o/r@main#missing/path");
        let err = manager.ensure_workspace(&s).await.unwrap_err();
        assert!(matches!(
            err,
            RenvError::Git(GitError::SubfolderNotFound { ref path }) if path == "missing/path"
        ));
        assert!(!manager.workspace_dir(&s).exists());
        assert!(!root.path().join("o/r/main-sub-missing-path").exists());
        assert!(vcs.calls_to("sparse_checkout").is_empty());
    }

    #[tokio::test]
    async fn test_ensure_workspace_subfolder_sets_sparse_and_mount() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".cache/o/r/.git")).unwrap();
        let vcs = MockVcs::new()
            .with_ref("refs/heads/main")
            .with_path("a/b");
        let manager = WorkspaceManager::new(vcs.clone(), root.path());

        let ws = manager.ensure_workspace(&spec("o/r@main#a/b")).await.unwrap();
        assert_eq!(ws.work_dir, ws.root.join("a/b"));
        assert_eq!(vcs.calls_to("sparse_checkout"), vec!["sparse_checkout a/b"]);
    }

    #[test]
    fn test_list_environments_and_caches() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".cache/o/r/.git")).unwrap();
        std::fs::create_dir_all(root.path().join("o/r/main/r/.git")).unwrap();
        std::fs::create_dir_all(root.path().join("o/r/dev-sub-a/r/.git")).unwrap();
        std::fs::create_dir_all(root.path().join("o/r/stale/r")).unwrap();

        assert_eq!(list_cached_repos(root.path()).unwrap(), vec!["o/r"]);
        let envs = list_environments(root.path()).unwrap();
        let names: Vec<String> = envs.iter().map(|e| e.container_name()).collect();
        assert_eq!(names, vec!["r.dev-sub-a", "r.main"]);
    }

    #[test]
    fn test_listed_long_branch_maps_to_launched_name() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(MockVcs::new(), root.path());
        let s = spec(&format!("o/r@{}", "long-branch-".repeat(12)));
        std::fs::create_dir_all(manager.workspace_dir(&s).join(".git")).unwrap();

        let envs = list_environments(root.path()).unwrap();
        assert_eq!(envs.len(), 1);
        let name = envs[0].container_name();
        assert_eq!(name, naming::container_name(&s));
        assert_eq!(name.len(), naming::MAX_NAME_LEN);
    }

    #[test]
    fn test_remove_workspace() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(MockVcs::new(), root.path());
        let s = spec("o/r@main");
        assert!(!manager.remove_workspace(&s).unwrap());
        std::fs::create_dir_all(manager.workspace_dir(&s).join(".git")).unwrap();
        assert!(manager.remove_workspace(&s).unwrap());
        assert!(!root.path().join("o/r/main").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_all_preserves_symlinks() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink("target.txt", src.join("link")).unwrap();

        let dst = tmp.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();
        assert_eq!(
            std::fs::read_link(dst.join("link")).unwrap(),
            PathBuf::from("target.txt")
        );
    }
}
