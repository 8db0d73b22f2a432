//! Container runtime selection
//!
//! Switches between docker-compatible runtimes (Docker, Podman) without
//! changing lifecycle logic. Selection order: CLI flag, then `RENV_RUNTIME`,
//! then Docker.

use crate::container::ContainerOps;
use crate::docker::{CliRuntime, Docker};
use crate::errors::{ConfigError, RenvError};

/// Environment variable selecting the runtime
pub const RUNTIME_ENV: &str = "RENV_RUNTIME";

/// Everything the lifecycle controller needs from a runtime
pub trait ContainerRuntime: Docker + ContainerOps {}

impl<T: Docker + ContainerOps> ContainerRuntime for T {}

/// Supported container runtime kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = RenvError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(ConfigError::Validation {
                message: format!("Unknown runtime: {}. Supported runtimes: docker, podman", s),
            }
            .into()),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime factory for creating runtime instances
pub struct RuntimeFactory;

impl RuntimeFactory {
    /// Pick the runtime from the CLI flag, then `RENV_RUNTIME`, then Docker
    pub fn detect_runtime(cli_runtime: Option<RuntimeKind>) -> RuntimeKind {
        if let Some(runtime) = cli_runtime {
            return runtime;
        }

        if let Ok(env_runtime) = std::env::var(RUNTIME_ENV) {
            if let Ok(runtime) = env_runtime.parse() {
                return runtime;
            }
            tracing::warn!("Ignoring unknown {}={}", RUNTIME_ENV, env_runtime);
        }

        RuntimeKind::Docker
    }

    pub fn create_runtime(kind: RuntimeKind) -> CliRuntime {
        match kind {
            RuntimeKind::Docker => CliRuntime::docker(),
            RuntimeKind::Podman => CliRuntime::podman(),
        }
    }
}
