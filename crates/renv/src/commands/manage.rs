//! Environment management: `--list`, `--destroy`, `--prune` and the hidden
//! completion helpers

use anyhow::Result;
use renv_core::config;
use renv_core::container::ContainerIdentity;
use renv_core::container_lifecycle::stop_and_remove;
use renv_core::docker::Docker;
use renv_core::errors::RenvError;
use renv_core::git::CliGit;
use renv_core::repo_spec::RepoSpec;
use renv_core::runtime::{RuntimeFactory, RuntimeKind};
use renv_core::workspace::{list_cached_repos, list_environments, WorkspaceManager};
use tracing::{debug, instrument, warn};

/// Print every workspace copy with its container state
#[instrument]
pub async fn execute_list(runtime: Option<RuntimeKind>) -> Result<()> {
    let root = config::default_root()?;
    let entries = list_environments(&root)?;
    if entries.is_empty() {
        println!("No environments under {}", root.display());
        return Ok(());
    }

    let runtime = RuntimeFactory::create_runtime(RuntimeFactory::detect_runtime(runtime));
    let available = match runtime.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Container runtime unavailable, states unknown: {}", e);
            false
        }
    };

    for entry in entries {
        let name = entry.container_name();
        let state = if available {
            match runtime.inspect_container(&name).await {
                Ok(Some(info)) => info.status,
                Ok(None) => "absent".to_string(),
                Err(e) => {
                    debug!("Inspect of {} failed: {}", name, e);
                    "unknown".to_string()
                }
            }
        } else {
            "unknown".to_string()
        };
        println!(
            "{}/{}\t{}\t{}\t{}",
            entry.owner,
            entry.repo,
            name,
            state,
            entry.path.display()
        );
    }
    Ok(())
}

/// Stop and remove the container for `spec`; with `prune`, delete its workspace too
#[instrument(skip(runtime))]
pub async fn execute_remove(spec: &str, prune: bool, runtime: Option<RuntimeKind>) -> Result<()> {
    let root = config::default_root()?;
    let spec = RepoSpec::parse(spec).map_err(RenvError::from)?;
    let manager = WorkspaceManager::new(CliGit::new(), &root);

    let cache = manager.cache_dir(&spec);
    let spec = if !spec.branch_explicit && cache.join(".git").exists() {
        let branch = manager.default_branch(&cache).await?;
        spec.with_default_branch(&branch)
    } else {
        spec
    };

    let identity = ContainerIdentity::new(&spec, &root);
    let runtime = RuntimeFactory::create_runtime(RuntimeFactory::detect_runtime(runtime));
    runtime.ping().await?;

    if stop_and_remove(&runtime, &identity.name).await? {
        println!("Removed container {}", identity.name);
    } else {
        println!("No container named {}", identity.name);
    }

    if prune {
        if manager.remove_workspace(&spec)? {
            println!("Deleted workspace {}", identity.workspace_dir.display());
        } else {
            println!("No workspace at {}", identity.workspace_dir.display());
        }
    }
    Ok(())
}

/// Cached `owner/repo` pairs, one per line
pub fn complete_repos() -> Result<()> {
    let root = config::default_root()?;
    for repo in list_cached_repos(&root)? {
        println!("{}", repo);
    }
    Ok(())
}

/// Branches known to the cache of `slug`, one per line
pub async fn complete_branches(slug: &str) -> Result<()> {
    let root = config::default_root()?;
    let spec = RepoSpec::parse(slug).map_err(RenvError::from)?;
    let manager = WorkspaceManager::new(CliGit::new(), &root);
    for branch in manager.cached_branches(&spec).await? {
        println!("{}", branch);
    }
    Ok(())
}
