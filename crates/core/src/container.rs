//! Container identity and lifecycle primitives
//!
//! [`ContainerIdentity`] bundles everything derived from a [`RepoSpec`] that the
//! runtime and build tool need. [`ContainerOps`] carries the start/remove verbs
//! that complement the inspection and exec verbs on [`crate::docker::Docker`].

use crate::errors::Result;
use crate::naming;
use crate::repo_spec::RepoSpec;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Derived identity of an environment's container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    /// Runtime container name, the only reliable identity key
    pub name: String,
    /// In-container hostname (repo only)
    pub hostname: String,
    /// Shared cache directory for the repository
    pub cache_dir: PathBuf,
    /// Workspace copy for this (branch, subfolder)
    pub workspace_dir: PathBuf,
}

impl ContainerIdentity {
    #[instrument(skip(spec), fields(spec = %spec))]
    pub fn new(spec: &RepoSpec, root: &Path) -> Self {
        Self {
            name: naming::container_name(spec),
            hostname: naming::hostname(spec),
            cache_dir: naming::cache_dir(spec, root),
            workspace_dir: naming::workspace_dir(spec, root),
        }
    }
}

/// Runtime-reported container state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    /// Created, exited, paused or any other non-running state
    Stopped,
}

impl ContainerState {
    /// Map `State.Status` from inspect output
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "running" => ContainerState::Running,
            _ => ContainerState::Stopped,
        }
    }
}

/// Container operations for lifecycle management
#[allow(async_fn_in_trait)]
pub trait ContainerOps {
    /// Start a stopped container by name
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Force-remove a container by name
    async fn remove_container(&self, name: &str) -> Result<()>;
}

impl<T: ContainerOps> ContainerOps for &T {
    async fn start_container(&self, name: &str) -> Result<()> {
        (*self).start_container(name).await
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        (*self).remove_container(name).await
    }
}
