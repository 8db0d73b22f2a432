//! Version control boundary
//!
//! [`Vcs`] is the small set of git verbs the workspace manager needs, all keyed
//! by directory. [`CliGit`] shells out to the `git` binary; [`mock::MockVcs`]
//! records calls for tests. Every failure is wrapped with the operation name
//! and target directory.

use crate::errors::{classify_git_error, GitError, GitFailureKind, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Git operations used by the cache and workspace manager
#[allow(async_fn_in_trait)]
pub trait Vcs {
    /// Clone `url` with full history into `dest`
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Fetch all remotes, pruning deleted refs
    async fn fetch(&self, dir: &Path) -> Result<()>;

    /// Fast-forward the current branch from its upstream
    async fn pull_ff_only(&self, dir: &Path) -> Result<()>;

    /// Whether the working tree has no local modifications
    async fn is_clean(&self, dir: &Path) -> Result<bool>;

    /// Whether the current branch has an upstream configured
    async fn has_upstream(&self, dir: &Path) -> Result<bool>;

    /// Whether `reference` resolves (works for `refs/heads/*` and `refs/remotes/*`)
    async fn verify_ref(&self, dir: &Path, reference: &str) -> Result<bool>;

    /// Check out an existing local branch
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Create `branch` tracking the remote-tracking ref `upstream`
    async fn checkout_tracking(&self, dir: &Path, branch: &str, upstream: &str) -> Result<()>;

    /// Create `branch` from `start_point` without configuring tracking
    async fn create_branch(&self, dir: &Path, branch: &str, start_point: &str) -> Result<()>;

    /// Branch the remote's `HEAD` points at, if advertised
    async fn remote_head(&self, dir: &Path) -> Result<Option<String>>;

    /// Whether `path` exists in the tree of `HEAD`
    async fn path_exists(&self, dir: &Path, path: &str) -> Result<bool>;

    /// Restrict the working tree to the directories in `paths`
    async fn sparse_checkout_set(&self, dir: &Path, paths: &[String]) -> Result<()>;

    /// Initialize and update submodules recursively
    async fn submodule_update(&self, dir: &Path) -> Result<()>;

    /// Local and remote-tracking branch names, sorted and deduplicated
    async fn list_branches(&self, dir: &Path) -> Result<Vec<String>>;
}

impl<T: Vcs> Vcs for &T {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        (*self).clone_repo(url, dest).await
    }
    async fn fetch(&self, dir: &Path) -> Result<()> {
        (*self).fetch(dir).await
    }
    async fn pull_ff_only(&self, dir: &Path) -> Result<()> {
        (*self).pull_ff_only(dir).await
    }
    async fn is_clean(&self, dir: &Path) -> Result<bool> {
        (*self).is_clean(dir).await
    }
    async fn has_upstream(&self, dir: &Path) -> Result<bool> {
        (*self).has_upstream(dir).await
    }
    async fn verify_ref(&self, dir: &Path, reference: &str) -> Result<bool> {
        (*self).verify_ref(dir, reference).await
    }
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        (*self).checkout(dir, branch).await
    }
    async fn checkout_tracking(&self, dir: &Path, branch: &str, upstream: &str) -> Result<()> {
        (*self).checkout_tracking(dir, branch, upstream).await
    }
    async fn create_branch(&self, dir: &Path, branch: &str, start_point: &str) -> Result<()> {
        (*self).create_branch(dir, branch, start_point).await
    }
    async fn remote_head(&self, dir: &Path) -> Result<Option<String>> {
        (*self).remote_head(dir).await
    }
    async fn path_exists(&self, dir: &Path, path: &str) -> Result<bool> {
        (*self).path_exists(dir, path).await
    }
    async fn sparse_checkout_set(&self, dir: &Path, paths: &[String]) -> Result<()> {
        (*self).sparse_checkout_set(dir, paths).await
    }
    async fn submodule_update(&self, dir: &Path) -> Result<()> {
        (*self).submodule_update(dir).await
    }
    async fn list_branches(&self, dir: &Path) -> Result<Vec<String>> {
        (*self).list_branches(dir).await
    }
}

/// Captured result of a git invocation
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// `git` CLI implementation
#[derive(Debug, Clone)]
pub struct CliGit {
    git_path: String,
}

impl CliGit {
    pub fn new() -> Self {
        Self {
            git_path: "git".to_string(),
        }
    }

    pub fn with_path(git_path: impl Into<String>) -> Self {
        Self {
            git_path: git_path.into(),
        }
    }

    async fn output(&self, dir: Option<&Path>, args: &[&str]) -> Result<GitOutput> {
        let mut command = Command::new(&self.git_path);
        if let Some(dir) = dir {
            command.arg("-C").arg(dir);
        }
        command.args(args);
        // Never block on a credential prompt
        command.env("GIT_TERMINAL_PROMPT", "0");
        debug!("git {}", shell_words::join(args));

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::NotInstalled
            } else {
                GitError::CommandFailed {
                    operation: args.first().copied().unwrap_or("git").to_string(),
                    dir: dir.map(Path::to_path_buf).unwrap_or_default(),
                    message: e.to_string(),
                }
            }
        })?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run a command that must succeed; remote operations classify network/auth failures
    async fn run(&self, operation: &str, dir: &Path, args: &[&str], remote: bool) -> Result<String> {
        let output = self.output(Some(dir), args).await?;
        if output.success {
            return Ok(output.stdout);
        }
        let message = output.stderr.trim().to_string();
        let operation = operation.to_string();
        let dir = dir.to_path_buf();
        let kind = if remote {
            classify_git_error(&message)
        } else {
            GitFailureKind::Other
        };
        Err(match kind {
            GitFailureKind::Network => GitError::Network {
                operation,
                dir,
                message,
            },
            GitFailureKind::Auth => GitError::Auth {
                operation,
                dir,
                message,
            },
            GitFailureKind::Other => GitError::CommandFailed {
                operation,
                dir,
                message,
            },
        }
        .into())
    }

    /// Run a query whose exit status is the answer
    async fn probe(&self, dir: &Path, args: &[&str]) -> Result<bool> {
        Ok(self.output(Some(dir), args).await?.success)
    }
}

impl Default for CliGit {
    fn default() -> Self {
        Self::new()
    }
}

impl Vcs for CliGit {
    #[instrument(skip(self))]
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest.parent().unwrap_or(dest);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| crate::errors::RenvError::io(parent, e))?;
        let dest_str = dest.to_string_lossy();
        self.run("clone", parent, &["clone", url, &dest_str], true)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, dir: &Path) -> Result<()> {
        self.run("fetch", dir, &["fetch", "--all", "--prune"], true)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull_ff_only(&self, dir: &Path) -> Result<()> {
        self.run("pull", dir, &["pull", "--ff-only"], true).await?;
        Ok(())
    }

    async fn is_clean(&self, dir: &Path) -> Result<bool> {
        let status = self
            .run("status", dir, &["status", "--porcelain"], false)
            .await?;
        Ok(status.trim().is_empty())
    }

    async fn has_upstream(&self, dir: &Path) -> Result<bool> {
        self.probe(
            dir,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )
        .await
    }

    async fn verify_ref(&self, dir: &Path, reference: &str) -> Result<bool> {
        self.probe(dir, &["rev-parse", "--verify", "--quiet", reference])
            .await
    }

    #[instrument(skip(self))]
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run("checkout", dir, &["checkout", branch], false)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn checkout_tracking(&self, dir: &Path, branch: &str, upstream: &str) -> Result<()> {
        self.run(
            "checkout",
            dir,
            &["checkout", "-b", branch, "--track", upstream],
            false,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, dir: &Path, branch: &str, start_point: &str) -> Result<()> {
        self.run(
            "checkout",
            dir,
            &["checkout", "--no-track", "-b", branch, start_point],
            false,
        )
        .await?;
        Ok(())
    }

    async fn remote_head(&self, dir: &Path) -> Result<Option<String>> {
        let output = self
            .output(
                Some(dir),
                &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
            )
            .await?;
        if !output.success {
            return Ok(None);
        }
        let head = output.stdout.trim();
        Ok(head
            .strip_prefix("origin/")
            .filter(|b| !b.is_empty())
            .map(str::to_string))
    }

    async fn path_exists(&self, dir: &Path, path: &str) -> Result<bool> {
        let object = format!("HEAD:{}", path);
        self.probe(dir, &["cat-file", "-e", &object]).await
    }

    #[instrument(skip(self))]
    async fn sparse_checkout_set(&self, dir: &Path, paths: &[String]) -> Result<()> {
        let patterns = sparse_patterns(paths);
        let mut args = vec!["sparse-checkout", "set", "--no-cone"];
        args.extend(patterns.iter().map(String::as_str));
        self.run("sparse-checkout", dir, &args, false).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn submodule_update(&self, dir: &Path) -> Result<()> {
        self.run(
            "submodule update",
            dir,
            &["submodule", "update", "--init", "--recursive"],
            true,
        )
        .await?;
        Ok(())
    }

    async fn list_branches(&self, dir: &Path) -> Result<Vec<String>> {
        let out = self
            .run(
                "for-each-ref",
                dir,
                &[
                    "for-each-ref",
                    "--format=%(refname:short)",
                    "refs/heads",
                    "refs/remotes/origin",
                ],
                false,
            )
            .await?;
        let branches: std::collections::BTreeSet<String> = out
            .lines()
            .map(str::trim)
            .map(|l| l.strip_prefix("origin/").unwrap_or(l))
            .filter(|l| !l.is_empty() && *l != "HEAD" && *l != "origin")
            .map(str::to_string)
            .collect();
        Ok(branches.into_iter().collect())
    }
}

/// Anchored directory patterns: `a/b` only matches `/a/b/`, never `x/a/b`
/// or the files beside it
fn sparse_patterns(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .map(|p| format!("/{}/", p.trim_matches('/')))
        .collect()
}

/// Check if a git binary is available on PATH
pub async fn is_git_available() -> bool {
    CliGit::new()
        .output(None, &["--version"])
        .await
        .map(|o| o.success)
        .unwrap_or(false)
}

pub mod mock {
    //! In-memory [`Vcs`] that records every call
    //!
    //! Refs and paths are answered from configured sets. `clone_repo` creates
    //! the destination with an empty `.git` directory so filesystem copies work.

    use super::Vcs;
    use crate::errors::{GitError, Result};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Failure to inject into a remote operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockRemoteFailure {
        Network,
        Auth,
    }

    #[derive(Debug, Default)]
    struct MockVcsState {
        calls: Vec<String>,
        refs: HashSet<String>,
        paths: HashSet<String>,
        remote_head: Option<String>,
        branches: Vec<String>,
        dirty: bool,
        remote_failure: Option<MockRemoteFailure>,
    }

    /// Recording VCS fake
    #[derive(Debug, Clone, Default)]
    pub struct MockVcs {
        state: Arc<Mutex<MockVcsState>>,
    }

    impl MockVcs {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `reference` resolve in `verify_ref`
        pub fn with_ref(self, reference: &str) -> Self {
            self.lock().refs.insert(reference.to_string());
            self
        }

        /// Make `path` exist in `HEAD`
        pub fn with_path(self, path: &str) -> Self {
            self.lock().paths.insert(path.to_string());
            self
        }

        pub fn with_remote_head(self, branch: &str) -> Self {
            self.lock().remote_head = Some(branch.to_string());
            self
        }

        pub fn with_branches(self, branches: &[&str]) -> Self {
            self.lock().branches = branches.iter().map(|b| b.to_string()).collect();
            self
        }

        pub fn with_dirty_tree(self) -> Self {
            self.lock().dirty = true;
            self
        }

        /// Fail every remote operation with the given classification
        pub fn with_remote_failure(self, failure: MockRemoteFailure) -> Self {
            self.lock().remote_failure = Some(failure);
            self
        }

        /// Every recorded call, in order
        pub fn calls(&self) -> Vec<String> {
            self.lock().calls.clone()
        }

        /// Recorded calls whose verb is `verb`
        pub fn calls_to(&self, verb: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.split_whitespace().next() == Some(verb))
                .collect()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockVcsState> {
            self.state.lock().unwrap_or_else(|p| p.into_inner())
        }

        fn record(&self, call: String) {
            self.lock().calls.push(call);
        }

        fn remote(&self, operation: &str, dir: &Path) -> Result<()> {
            let failure = self.lock().remote_failure;
            match failure {
                Some(MockRemoteFailure::Network) => Err(GitError::Network {
                    operation: operation.to_string(),
                    dir: dir.to_path_buf(),
                    message: "Could not resolve host".to_string(),
                }
                .into()),
                Some(MockRemoteFailure::Auth) => Err(GitError::Auth {
                    operation: operation.to_string(),
                    dir: dir.to_path_buf(),
                    message: "Permission denied (publickey)".to_string(),
                }
                .into()),
                None => Ok(()),
            }
        }
    }

    impl Vcs for MockVcs {
        async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
            self.record(format!("clone {}", url));
            self.remote("clone", dest)?;
            std::fs::create_dir_all(dest.join(".git"))
                .map_err(|e| crate::errors::RenvError::io(dest, e))?;
            Ok(())
        }

        async fn fetch(&self, dir: &Path) -> Result<()> {
            self.record("fetch".to_string());
            self.remote("fetch", dir)
        }

        async fn pull_ff_only(&self, dir: &Path) -> Result<()> {
            self.record("pull".to_string());
            self.remote("pull", dir)
        }

        async fn is_clean(&self, _dir: &Path) -> Result<bool> {
            Ok(!self.lock().dirty)
        }

        async fn has_upstream(&self, _dir: &Path) -> Result<bool> {
            Ok(true)
        }

        async fn verify_ref(&self, _dir: &Path, reference: &str) -> Result<bool> {
            self.record(format!("verify_ref {}", reference));
            Ok(self.lock().refs.contains(reference))
        }

        async fn checkout(&self, _dir: &Path, branch: &str) -> Result<()> {
            self.record(format!("checkout {}", branch));
            Ok(())
        }

        async fn checkout_tracking(&self, _dir: &Path, branch: &str, upstream: &str) -> Result<()> {
            self.record(format!("checkout_tracking {} {}", branch, upstream));
            self.lock().refs.insert(format!("refs/heads/{}", branch));
            Ok(())
        }

        async fn create_branch(&self, _dir: &Path, branch: &str, start_point: &str) -> Result<()> {
            self.record(format!("create_branch {} {}", branch, start_point));
            self.lock().refs.insert(format!("refs/heads/{}", branch));
            Ok(())
        }

        async fn remote_head(&self, _dir: &Path) -> Result<Option<String>> {
            Ok(self.lock().remote_head.clone())
        }

        async fn path_exists(&self, _dir: &Path, path: &str) -> Result<bool> {
            Ok(self.lock().paths.contains(path))
        }

        async fn sparse_checkout_set(&self, _dir: &Path, paths: &[String]) -> Result<()> {
            self.record(format!("sparse_checkout {}", paths.join(" ")));
            Ok(())
        }

        async fn submodule_update(&self, dir: &Path) -> Result<()> {
            self.record("submodule_update".to_string());
            self.remote("submodule update", dir)
        }

        async fn list_branches(&self, _dir: &Path) -> Result<Vec<String>> {
            Ok(self.lock().branches.clone())
        }
    }
}
