//! Container runtime integration
//!
//! The [`Docker`] trait covers inspection, exec and stop by container name.
//! [`CliRuntime`] implements it (and [`ContainerOps`]) by shelling out to a
//! docker-compatible CLI. Runtime stderr is classified once, in
//! [`crate::errors::classify_runtime_error`], and carried as a
//! [`RuntimeErrorKind`] from then on.

use crate::container::{ContainerOps, ContainerState};
use crate::errors::{DockerError, Result, RuntimeErrorKind};
use std::collections::HashMap;
use std::process::Command;
use tracing::{debug, instrument};

/// Detects if an error message indicates a PTY allocation failure.
fn is_pty_allocation_error(error_msg: &str) -> bool {
    let lower = error_msg.to_lowercase();
    lower.contains("the input device is not a tty") || lower.contains("cannot enable tty mode")
}

fn cli_error(message: String) -> DockerError {
    DockerError::CommandFailed {
        kind: RuntimeErrorKind::Other,
        message,
    }
}

/// Container information returned by inspect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    /// Raw `State.Status`
    pub status: String,
    /// Container environment (from `Config.Env`)
    pub env: HashMap<String, String>,
}

/// Configuration for executing commands in containers
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Whether to allocate a TTY
    pub tty: bool,
    /// Whether to attach stdin
    pub interactive: bool,
    /// Capture output instead of inheriting stdio (internal probes)
    pub silent: bool,
}

/// Result of an exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub success: bool,
    /// Captured output, empty unless `silent`
    pub stdout: String,
    pub stderr: String,
}

/// Container runtime abstraction
#[allow(async_fn_in_trait)]
pub trait Docker {
    /// Check the runtime is installed and its daemon reachable
    async fn ping(&self) -> Result<()>;

    /// Inspect a container by name; `None` when it does not exist
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Execute a command in a running container
    async fn exec(&self, name: &str, command: &[String], config: ExecConfig) -> Result<ExecResult>;

    /// Stop a container with optional timeout in seconds
    async fn stop_container(&self, name: &str, timeout: Option<u32>) -> Result<()>;
}

impl<T: Docker> Docker for &T {
    async fn ping(&self) -> Result<()> {
        (*self).ping().await
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        (*self).inspect_container(name).await
    }

    async fn exec(&self, name: &str, command: &[String], config: ExecConfig) -> Result<ExecResult> {
        (*self).exec(name, command, config).await
    }

    async fn stop_container(&self, name: &str, timeout: Option<u32>) -> Result<()> {
        (*self).stop_container(name, timeout).await
    }
}

/// Generic CLI-based container runtime implementation
///
/// Works for both Docker and Podman since they share a compatible CLI.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    /// Container runtime CLI binary path (e.g., "docker" or "podman")
    runtime_path: String,
}

impl CliRuntime {
    pub fn docker() -> Self {
        Self {
            runtime_path: "docker".to_string(),
        }
    }

    pub fn podman() -> Self {
        Self {
            runtime_path: "podman".to_string(),
        }
    }

    pub fn with_runtime_path(runtime_path: impl Into<String>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
        }
    }

    pub fn runtime_path(&self) -> &str {
        &self.runtime_path
    }

    /// Parse the JSON array printed by `inspect`
    pub fn parse_container_inspect(json_output: &str) -> Result<Option<ContainerInfo>> {
        let containers: Vec<serde_json::Value> = serde_json::from_str(json_output)
            .map_err(|e| cli_error(format!("Failed to parse inspect JSON: {}", e)))?;

        let Some(container) = containers.first() else {
            return Ok(None);
        };

        let env = container
            .get("Config")
            .and_then(|config| config.get("Env"))
            .and_then(|env| env.as_array())
            .map(|env_array| {
                env_array
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| s.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let status = container
            .get("State")
            .and_then(|s| s.get("Status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string();

        let str_field = |key: &str| {
            container
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(Some(ContainerInfo {
            id: str_field("Id"),
            name: str_field("Name").trim_start_matches('/').to_string(),
            image: container
                .get("Config")
                .and_then(|c| c.get("Image"))
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_string(),
            state: ContainerState::from_status(&status),
            status,
            env,
        }))
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::docker()
    }
}

impl Docker for CliRuntime {
    async fn ping(&self) -> Result<()> {
        debug!("Pinging container runtime daemon");

        tokio::task::spawn_blocking({
            let runtime_path = self.runtime_path.clone();
            move || -> Result<()> {
                let output = Command::new(&runtime_path)
                    .args(["version", "--format", "json"])
                    .output();

                match output {
                    Ok(output) if output.status.success() => {
                        debug!("Container runtime daemon is available");
                        Ok(())
                    }
                    Ok(output) => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        Err(DockerError::from_stderr("Runtime ping failed", &stderr).into())
                    }
                    Err(e) => {
                        debug!("Runtime ping failed: {}", e);
                        Err(DockerError::NotInstalled.into())
                    }
                }
            }
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        debug!("Inspecting container: {}", name);

        let runtime_path = self.runtime_path.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<ContainerInfo>> {
            let output = Command::new(&runtime_path)
                .args(["container", "inspect", &name])
                .output()
                .map_err(|e| cli_error(format!("Failed to inspect container: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let err = DockerError::from_stderr("Inspect command failed", &stderr);
                if err.kind() == RuntimeErrorKind::NotFound {
                    return Ok(None);
                }
                return Err(err.into());
            }

            let stdout = String::from_utf8(output.stdout)
                .map_err(|e| cli_error(format!("Invalid UTF-8 in runtime output: {}", e)))?;
            Self::parse_container_inspect(&stdout)
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
    }

    #[instrument(skip(self, config))]
    async fn exec(&self, name: &str, command: &[String], config: ExecConfig) -> Result<ExecResult> {
        debug!("Executing command in container: {}", name);

        let runtime_path = self.runtime_path.clone();
        let name = name.to_string();
        let command = command.to_vec();

        tokio::task::spawn_blocking(move || -> Result<ExecResult> {
            let mut args = vec!["exec".to_string()];
            if config.tty {
                args.push("-t".to_string());
            }
            if config.interactive {
                args.push("-i".to_string());
            }
            if let Some(ref workdir) = config.working_dir {
                args.push("-w".to_string());
                args.push(workdir.clone());
            }
            let mut env: Vec<_> = config.env.iter().collect();
            env.sort();
            for (k, v) in env {
                args.push("-e".to_string());
                args.push(format!("{}={}", k, v));
            }
            args.push(name.clone());
            args.extend(command);

            debug!("Runtime exec args: {}", shell_words::join(&args));

            let mut cmd = Command::new(&runtime_path);
            cmd.args(&args);

            if config.silent {
                cmd.stdout(std::process::Stdio::piped());
                cmd.stderr(std::process::Stdio::piped());

                let output = cmd
                    .output()
                    .map_err(|e| cli_error(format!("Failed to execute runtime exec: {}", e)))?;

                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let success = output.status.success();

                if config.tty && !success && is_pty_allocation_error(&stderr) {
                    return Err(DockerError::TTYFailed {
                        reason: stderr.trim().to_string(),
                    }
                    .into());
                }

                Ok(ExecResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    success,
                    stdout,
                    stderr,
                })
            } else {
                // Inherited stdio: raw passthrough of the terminal to the container
                let status = cmd
                    .status()
                    .map_err(|e| cli_error(format!("Failed to spawn runtime exec: {}", e)))?;
                Ok(ExecResult {
                    exit_code: status.code().unwrap_or(-1),
                    success: status.success(),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, name: &str, timeout: Option<u32>) -> Result<()> {
        debug!("Stopping container: {}", name);

        let runtime_path = self.runtime_path.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), DockerError> {
            let mut args = vec!["stop".to_string()];
            if let Some(t) = timeout {
                args.push("-t".to_string());
                args.push(t.to_string());
            }
            args.push(name.clone());

            let output = Command::new(&runtime_path)
                .args(&args)
                .output()
                .map_err(|e| cli_error(format!("Failed to run stop command: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DockerError::from_stderr("Runtime stop command failed", &stderr));
            }

            debug!("Container {} stopped successfully", name);
            Ok(())
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }
}

impl ContainerOps for CliRuntime {
    #[instrument(skip(self))]
    async fn start_container(&self, name: &str) -> Result<()> {
        debug!("Starting container: {}", name);

        let runtime_path = self.runtime_path.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), DockerError> {
            let output = Command::new(&runtime_path)
                .args(["start", &name])
                .output()
                .map_err(|e| cli_error(format!("Failed to start container: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DockerError::from_stderr("Start command failed", &stderr));
            }
            Ok(())
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, name: &str) -> Result<()> {
        debug!("Removing container: {}", name);

        let runtime_path = self.runtime_path.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), DockerError> {
            let output = Command::new(&runtime_path)
                .args(["rm", "-f", &name])
                .output()
                .map_err(|e| cli_error(format!("Failed to remove container: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DockerError::from_stderr("Remove command failed", &stderr));
            }
            Ok(())
        })
        .await
        .map_err(|e| cli_error(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }
}

pub mod mock {
    //! Mock container runtime for testing lifecycle flows
    //!
    //! Containers live in a shared in-memory table. A container may reference a
    //! host mount source; when that path no longer exists, `start` and `exec`
    //! fail with the runtime's mount-namespace error, like a real daemon would
    //! after the workspace is deleted.

    use crate::container::{ContainerOps, ContainerState};
    use crate::docker::{ContainerInfo, Docker, ExecConfig, ExecResult};
    use crate::errors::{DockerError, Result};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// Error text a real runtime reports for a vanished bind mount
    pub const BREAKOUT_STDERR: &str = "OCI runtime exec failed: exec failed: unable to start container process: current working directory is outside of container mount namespace root -- possible container breakout detected: unknown";

    /// Mock container state for simulation
    #[derive(Debug, Clone)]
    pub struct MockContainer {
        pub name: String,
        pub image: String,
        pub state: ContainerState,
        pub env: HashMap<String, String>,
        /// Host path bind-mounted into the container
        pub mount_source: Option<PathBuf>,
        /// Inspect calls before a stopped container reports running
        pub polls_until_running: Option<u32>,
        /// Stderr returned by `start`
        pub start_error: Option<String>,
        /// Host directory was replaced since the container was created
        pub mount_stale: bool,
    }

    impl MockContainer {
        /// A running container
        pub fn new(name: &str, image: &str) -> Self {
            Self {
                name: name.to_string(),
                image: image.to_string(),
                state: ContainerState::Running,
                env: HashMap::new(),
                mount_source: None,
                polls_until_running: None,
                start_error: None,
                mount_stale: false,
            }
        }

        pub fn stopped(mut self) -> Self {
            self.state = ContainerState::Stopped;
            self
        }

        pub fn with_env(mut self, key: &str, value: &str) -> Self {
            self.env.insert(key.to_string(), value.to_string());
            self
        }

        pub fn with_mount_source(mut self, path: impl Into<PathBuf>) -> Self {
            self.mount_source = Some(path.into());
            self
        }

        pub fn with_start_error(mut self, stderr: &str) -> Self {
            self.start_error = Some(stderr.to_string());
            self
        }

        fn mount_missing(&self) -> bool {
            self.mount_stale || self.mount_source.as_ref().is_some_and(|p| !p.exists())
        }
    }

    /// Recorded exec invocation
    #[derive(Debug, Clone)]
    pub struct MockExecCall {
        pub name: String,
        pub command: Vec<String>,
        pub config: ExecConfig,
    }

    /// Knobs for simulated behavior
    #[derive(Debug, Clone, Default)]
    pub struct MockDockerConfig {
        /// Newly created containers stay non-running for this many inspects
        pub polls_until_running: u32,
        /// Newly created containers never reach running
        pub never_running: bool,
        /// Exit code returned for user execs
        pub exec_exit_code: i32,
        /// Runtime is unavailable
        pub unavailable: bool,
    }

    #[derive(Debug, Default)]
    struct MockDockerState {
        containers: HashMap<String, MockContainer>,
        exec_history: Vec<MockExecCall>,
        calls: Vec<String>,
        config: MockDockerConfig,
    }

    /// In-memory runtime
    #[derive(Debug, Clone, Default)]
    pub struct MockDocker {
        state: Arc<Mutex<MockDockerState>>,
    }

    impl MockDocker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: MockDockerConfig) -> Self {
            let docker = Self::default();
            docker.lock().config = config;
            docker
        }

        fn lock(&self) -> MutexGuard<'_, MockDockerState> {
            self.state.lock().unwrap_or_else(|p| p.into_inner())
        }

        pub fn add_container(&self, container: MockContainer) {
            self.lock()
                .containers
                .insert(container.name.clone(), container);
        }

        /// Register a container the way a build tool launch would
        pub fn register_created(
            &self,
            name: &str,
            image: &str,
            env: HashMap<String, String>,
            mount_source: Option<PathBuf>,
        ) -> Result<()> {
            let mut state = self.lock();
            if state.containers.contains_key(name) {
                return Err(DockerError::NameConflict {
                    name: name.to_string(),
                }
                .into());
            }
            let config = state.config.clone();
            let (container_state, polls) = if config.never_running {
                (ContainerState::Stopped, Some(u32::MAX))
            } else if config.polls_until_running > 0 {
                (ContainerState::Stopped, Some(config.polls_until_running))
            } else {
                (ContainerState::Running, None)
            };
            state.containers.insert(
                name.to_string(),
                MockContainer {
                    name: name.to_string(),
                    image: image.to_string(),
                    state: container_state,
                    env,
                    mount_source,
                    polls_until_running: polls,
                    start_error: None,
                    mount_stale: false,
                },
            );
            state.calls.push(format!("create {}", name));
            Ok(())
        }

        /// Simulate the workspace being deleted and recreated underneath a
        /// container: the path exists again but the container's mount does not
        pub fn mark_mount_stale(&self, name: &str) {
            if let Some(container) = self.lock().containers.get_mut(name) {
                container.mount_stale = true;
            }
        }

        pub fn container(&self, name: &str) -> Option<MockContainer> {
            self.lock().containers.get(name).cloned()
        }

        /// Lifecycle calls (`start`, `stop`, `remove`, `create`) in order
        pub fn calls(&self) -> Vec<String> {
            self.lock().calls.clone()
        }

        pub fn exec_history(&self) -> Vec<MockExecCall> {
            self.lock().exec_history.clone()
        }
    }

    impl Docker for MockDocker {
        async fn ping(&self) -> Result<()> {
            if self.lock().config.unavailable {
                return Err(DockerError::NotInstalled.into());
            }
            Ok(())
        }

        async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
            let mut state = self.lock();
            let Some(container) = state.containers.get_mut(name) else {
                return Ok(None);
            };
            if let Some(polls) = container.polls_until_running.as_mut() {
                if *polls != u32::MAX {
                    *polls = polls.saturating_sub(1);
                }
                if *polls == 0 {
                    container.state = ContainerState::Running;
                    container.polls_until_running = None;
                }
            }
            let status = match container.state {
                ContainerState::Running => "running",
                ContainerState::Stopped => "exited",
            };
            Ok(Some(ContainerInfo {
                id: format!("mock-{}", container.name),
                name: container.name.clone(),
                image: container.image.clone(),
                state: container.state,
                status: status.to_string(),
                env: container.env.clone(),
            }))
        }

        async fn exec(&self, name: &str, command: &[String], config: ExecConfig) -> Result<ExecResult> {
            let mut state = self.lock();
            state.exec_history.push(MockExecCall {
                name: name.to_string(),
                command: command.to_vec(),
                config: config.clone(),
            });
            let exit_code = state.config.exec_exit_code;
            let container = state.containers.get(name).ok_or_else(|| {
                DockerError::from_stderr("exec failed", &format!("No such container: {}", name))
            })?;
            if container.state != ContainerState::Running {
                return Err(DockerError::from_stderr(
                    "exec failed",
                    &format!("container {} is not running", name),
                )
                .into());
            }
            if container.mount_missing() {
                return Ok(ExecResult {
                    exit_code: 126,
                    success: false,
                    stdout: String::new(),
                    stderr: BREAKOUT_STDERR.to_string(),
                });
            }
            // Probes always succeed; only user commands get the configured code
            let exit_code = if config.silent { 0 } else { exit_code };
            Ok(ExecResult {
                exit_code,
                success: exit_code == 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn stop_container(&self, name: &str, _timeout: Option<u32>) -> Result<()> {
            let mut state = self.lock();
            state.calls.push(format!("stop {}", name));
            match state.containers.get_mut(name) {
                Some(container) => {
                    container.state = ContainerState::Stopped;
                    Ok(())
                }
                None => Err(DockerError::from_stderr(
                    "Runtime stop command failed",
                    &format!("Error response from daemon: No such container: {}", name),
                )
                .into()),
            }
        }
    }

    impl ContainerOps for MockDocker {
        async fn start_container(&self, name: &str) -> Result<()> {
            let mut state = self.lock();
            state.calls.push(format!("start {}", name));
            let container = state.containers.get_mut(name).ok_or_else(|| {
                DockerError::from_stderr("Start command failed", &format!("No such container: {}", name))
            })?;
            if let Some(stderr) = &container.start_error {
                return Err(DockerError::from_stderr("Start command failed", stderr).into());
            }
            if container.mount_missing() {
                return Err(DockerError::from_stderr("Start command failed", BREAKOUT_STDERR).into());
            }
            container.state = ContainerState::Running;
            Ok(())
        }

        async fn remove_container(&self, name: &str) -> Result<()> {
            let mut state = self.lock();
            state.calls.push(format!("remove {}", name));
            match state.containers.remove(name) {
                Some(_) => Ok(()),
                None => Err(DockerError::from_stderr(
                    "Remove command failed",
                    &format!("Error: No such container: {}", name),
                )
                .into()),
            }
        }
    }
}
