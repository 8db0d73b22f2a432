//! Container lifecycle state machine
//!
//! Decides, for one environment, whether the existing container can be
//! reused, must be started, rebuilt, or recovered after its workspace vanished.
//!
//! ```text
//! ABSENT ──create──▶ RUNNING ◀──start── STOPPED
//!                      │  ▲
//!        mount lost    │  │ recover (stop+remove, recreate workspace, create)
//!                      ▼  │
//!                    CORRUPTED
//! ```
//!
//! `--force`/`--nocache` and a fingerprint mismatch both stop and remove the
//! container before creating it again. Old containers are never renamed.

use crate::build::BuildTool;
use crate::config::RenvConfig;
use crate::container::ContainerState;
use crate::docker::ExecConfig;
use crate::errors::{classify_runtime_error, DockerError, RenvError, Result, RuntimeErrorKind};
use crate::git::Vcs;
use crate::launch_plan::{LaunchPlan, FINGERPRINT_ENV};
use crate::progress::{self, ProgressEvent, ProgressTracker, SharedTracker};
use crate::repo_spec::RepoSpec;
use crate::runtime::ContainerRuntime;
use crate::workspace::WorkspaceManager;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default bound on waiting for a new container to report running
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default poll interval while waiting
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(500);
/// Grace period passed to `stop`
const STOP_TIMEOUT_SECS: u32 = 5;

/// Fixed-interval wait for the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            interval: DEFAULT_WAIT_INTERVAL,
        }
    }
}

impl WaitPolicy {
    /// Defaults overridden by the `wait` configuration key
    pub fn from_config(config: &RenvConfig) -> Self {
        let defaults = Self::default();
        Self {
            timeout: config.wait_timeout().unwrap_or(defaults.timeout),
            interval: config.wait_interval().unwrap_or(defaults.interval),
        }
    }
}

/// Caller-requested lifecycle behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleOptions {
    /// Stop and rebuild even if a usable container exists
    pub force: bool,
    /// Rebuild without the layer cache
    pub nocache: bool,
    pub wait: WaitPolicy,
}

/// What the controller did to reach a running container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Running container with matching fingerprint
    Reused,
    /// Stopped container started again
    Started,
    /// No container existed
    Created,
    /// Existing container removed and recreated
    Rebuilt,
    /// Container had lost its workspace and was recreated
    Recovered,
}

impl LifecycleOutcome {
    /// Whether the build tool was invoked
    pub fn built(&self) -> bool {
        matches!(
            self,
            LifecycleOutcome::Created | LifecycleOutcome::Rebuilt | LifecycleOutcome::Recovered
        )
    }
}

/// Whether `err` carries the runtime's vanished-mount signature
pub fn is_mount_violation(err: &RenvError) -> bool {
    matches!(
        err,
        RenvError::Docker(e) if e.kind() == RuntimeErrorKind::MountNamespaceViolation
    )
}

/// Stop and remove `name`, treating "not found" and "already in progress" as done.
///
/// Returns whether a container existed.
#[instrument(skip(runtime))]
pub async fn stop_and_remove<R: ContainerRuntime>(runtime: &R, name: &str) -> Result<bool> {
    if runtime.inspect_container(name).await?.is_none() {
        debug!("No container named {}", name);
        return Ok(false);
    }
    if let Err(e) = runtime.stop_container(name, Some(STOP_TIMEOUT_SECS)).await {
        tolerate_race(e)?;
    }
    if let Err(e) = runtime.remove_container(name).await {
        tolerate_race(e)?;
    }
    Ok(true)
}

fn tolerate_race(err: RenvError) -> Result<()> {
    match &err {
        RenvError::Docker(e)
            if matches!(
                e.kind(),
                RuntimeErrorKind::NotFound | RuntimeErrorKind::InProgress
            ) =>
        {
            debug!("Ignoring benign runtime race: {}", e);
            Ok(())
        }
        _ => Err(err),
    }
}

/// Drives one environment's container to the running state
pub struct LifecycleController<'a, R, B, G: Vcs> {
    runtime: &'a R,
    builder: &'a B,
    workspaces: &'a WorkspaceManager<G>,
    options: LifecycleOptions,
    progress: Option<SharedTracker>,
}

impl<'a, R, B, G> LifecycleController<'a, R, B, G>
where
    R: ContainerRuntime,
    B: BuildTool,
    G: Vcs,
{
    pub fn new(
        runtime: &'a R,
        builder: &'a B,
        workspaces: &'a WorkspaceManager<G>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            runtime,
            builder,
            workspaces,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tracker: SharedTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tracker) = &self.progress {
            progress::emit(tracker, event);
        }
    }

    /// Bring the container for `plan` to RUNNING.
    ///
    /// `spec` must carry the resolved branch; it is used to recreate the
    /// workspace during recovery.
    #[instrument(skip(self, plan), fields(name = %plan.name))]
    pub async fn ensure_running(&self, spec: &RepoSpec, plan: &LaunchPlan) -> Result<LifecycleOutcome> {
        let name = plan.name.as_str();

        if self.options.force || self.options.nocache {
            let existed = self.remove(name, "rebuild requested").await?;
            self.create(plan).await?;
            return Ok(if existed {
                LifecycleOutcome::Rebuilt
            } else {
                LifecycleOutcome::Created
            });
        }

        let Some(info) = self.runtime.inspect_container(name).await? else {
            info!("No container {}; creating", name);
            self.create(plan).await?;
            return Ok(LifecycleOutcome::Created);
        };

        let stored = info.env.get(FINGERPRINT_ENV).map(String::as_str);
        if stored != Some(plan.fingerprint.as_str()) {
            info!(
                "Capabilities changed for {} ({} -> {}); rebuilding",
                name,
                stored.unwrap_or("<none>"),
                plan.fingerprint
            );
            self.remove(name, "capabilities changed").await?;
            self.create(plan).await?;
            return Ok(LifecycleOutcome::Rebuilt);
        }

        match info.state {
            ContainerState::Stopped => {
                debug!("Starting stopped container {}", name);
                self.emit(ProgressEvent::ContainerStart {
                    id: ProgressTracker::next_event_id(),
                    timestamp: ProgressTracker::current_timestamp(),
                    name: name.to_string(),
                });
                match self.runtime.start_container(name).await {
                    Ok(()) => {
                        self.wait_until_running(name).await?;
                        Ok(LifecycleOutcome::Started)
                    }
                    Err(e) if is_mount_violation(&e) => {
                        info!("Container {} lost its workspace mount: {}", name, e);
                        self.recover(spec, plan).await
                    }
                    Err(e) => Err(e),
                }
            }
            ContainerState::Running => {
                if self.probe_mount(plan).await? {
                    self.emit(ProgressEvent::ContainerReuse {
                        id: ProgressTracker::next_event_id(),
                        timestamp: ProgressTracker::current_timestamp(),
                        name: name.to_string(),
                    });
                    info!("Reusing running container {}", name);
                    Ok(LifecycleOutcome::Reused)
                } else {
                    info!("Container {} lost its workspace mount", name);
                    self.recover(spec, plan).await
                }
            }
        }
    }

    /// `false` when the container can no longer see its workspace
    async fn probe_mount(&self, plan: &LaunchPlan) -> Result<bool> {
        let config = ExecConfig {
            working_dir: Some(plan.workdir.clone()),
            silent: true,
            ..Default::default()
        };
        match self
            .runtime
            .exec(&plan.name, &["true".to_string()], config)
            .await
        {
            Ok(result) if result.success => Ok(true),
            Ok(result) => {
                if classify_runtime_error(&result.stderr) == RuntimeErrorKind::MountNamespaceViolation
                {
                    return Ok(false);
                }
                warn!(
                    "Probe in {} exited with {}; assuming container is usable",
                    plan.name, result.exit_code
                );
                Ok(true)
            }
            Err(e) if is_mount_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the broken container, make sure the workspace exists again and
    /// create the container directly. Runs at most once per invocation.
    async fn recover(&self, spec: &RepoSpec, plan: &LaunchPlan) -> Result<LifecycleOutcome> {
        self.emit(ProgressEvent::ContainerRecover {
            id: ProgressTracker::next_event_id(),
            timestamp: ProgressTracker::current_timestamp(),
            name: plan.name.clone(),
        });
        self.remove(&plan.name, "workspace mount lost").await?;
        let workspace = self.workspaces.ensure_workspace(spec).await?;
        if workspace.created {
            info!("Recreated workspace {}", workspace.root.display());
        }
        self.create(plan).await?;
        Ok(LifecycleOutcome::Recovered)
    }

    async fn remove(&self, name: &str, reason: &str) -> Result<bool> {
        let existed = stop_and_remove(self.runtime, name).await?;
        if existed {
            self.emit(ProgressEvent::ContainerRemove {
                id: ProgressTracker::next_event_id(),
                timestamp: ProgressTracker::current_timestamp(),
                name: name.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(existed)
    }

    /// Launch through the build tool and wait for RUNNING
    async fn create(&self, plan: &LaunchPlan) -> Result<()> {
        let start = Instant::now();
        self.emit(ProgressEvent::ContainerCreateBegin {
            id: ProgressTracker::next_event_id(),
            timestamp: ProgressTracker::current_timestamp(),
            name: plan.name.clone(),
            image: plan.image.clone(),
        });

        let mut plan = plan.clone();
        if self.options.nocache {
            plan.nocache = true;
            plan.persist_image = false;
        }

        let result = match self.builder.launch(&plan).await {
            Ok(()) => self.wait_until_running(&plan.name).await,
            Err(e) => Err(e),
        };

        self.emit(ProgressEvent::ContainerCreateEnd {
            id: ProgressTracker::next_event_id(),
            timestamp: ProgressTracker::current_timestamp(),
            name: plan.name.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.is_ok(),
        });
        result
    }

    /// Poll inspect at a fixed interval until RUNNING or the timeout expires
    async fn wait_until_running(&self, name: &str) -> Result<()> {
        let policy = self.options.wait;
        let deadline = Instant::now() + policy.timeout;
        loop {
            if let Some(info) = self.runtime.inspect_container(name).await? {
                if info.state == ContainerState::Running {
                    debug!("Container {} is running", name);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(DockerError::LaunchTimeout {
                    name: name.to_string(),
                    timeout: policy.timeout,
                }
                .into());
            }
            tokio::time::sleep(policy.interval).await;
        }
    }
}
