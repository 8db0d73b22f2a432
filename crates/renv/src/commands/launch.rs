//! Launch pipeline
//!
//! parse → ensure cache → resolve branch → ensure workspace → plan →
//! lifecycle → attach. Every step runs to completion before the next starts.

use anyhow::Result;
use renv_core::attach::AttachDriver;
use renv_core::build::rocker::CliBuildTool;
use renv_core::config::{self, resolve_layers, CliOverrides, RenvConfig};
use renv_core::container::ContainerIdentity;
use renv_core::container_lifecycle::{LifecycleController, LifecycleOptions, WaitPolicy};
use renv_core::docker::Docker;
use renv_core::errors::RenvError;
use renv_core::git::CliGit;
use renv_core::launch_plan::{self, LaunchOptions};
use renv_core::progress::{self, ProgressEvent, ProgressTracker, SharedTracker};
use renv_core::repo_spec::RepoSpec;
use renv_core::runtime::{RuntimeFactory, RuntimeKind};
use renv_core::workspace::{WorkspaceDir, WorkspaceManager};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Launch arguments collected from the command line
#[derive(Debug)]
pub struct LaunchArgs {
    pub spec: String,
    /// Command to run instead of an interactive shell
    pub command: Vec<String>,
    pub force: bool,
    pub nocache: bool,
    pub no_container: bool,
    pub overrides: CliOverrides,
    pub runtime: Option<RuntimeKind>,
    pub progress: SharedTracker,
}

/// Run the pipeline and return the attached command's exit code
#[instrument(skip(args), fields(spec = %args.spec))]
pub async fn execute_launch(args: LaunchArgs) -> Result<i32> {
    let spec = RepoSpec::parse(&args.spec).map_err(RenvError::from)?;
    let root = config::default_root()?;
    debug!("Using root {}", root.display());

    let global = RenvConfig::load_global(&root)?;
    let manager = WorkspaceManager::new(CliGit::new(), &root)
        .with_remote_template(global.remote_template());

    let (spec, workspace) = prepare_workspace(&manager, spec, &args.progress).await?;

    if args.no_container {
        args.progress
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .finish();
        println!("{}", workspace.work_dir.display());
        return Ok(0);
    }

    let project = RenvConfig::load_project(&workspace.root)?;
    let config = resolve_layers(global, project, args.overrides);

    let identity = ContainerIdentity::new(&spec, &root);
    let options = LaunchOptions {
        nocache: args.nocache,
        ..Default::default()
    };
    let plan = launch_plan::build(&spec, &identity, &workspace, &config, &options);
    debug!("Capabilities: {}", plan.capabilities.join(" "));

    let runtime = RuntimeFactory::create_runtime(RuntimeFactory::detect_runtime(args.runtime));
    runtime.ping().await?;
    let builder = CliBuildTool::new();

    let lifecycle = LifecycleOptions {
        force: args.force,
        nocache: args.nocache,
        wait: WaitPolicy::from_config(&config),
    };
    let controller = LifecycleController::new(&runtime, &builder, &manager, lifecycle)
        .with_progress(args.progress.clone());
    let outcome = controller.ensure_running(&spec, &plan).await?;
    info!("Container {} ready ({:?})", plan.name, outcome);

    // Clear the spinner before handing the terminal over
    args.progress
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .finish();

    let command = (!args.command.is_empty()).then_some(args.command.as_slice());
    let terminal = atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout);
    let driver = AttachDriver::new(&runtime);
    let code = driver
        .run(
            &plan.name,
            &plan.workdir,
            &workspace.work_dir,
            command,
            terminal,
        )
        .await?;
    Ok(code)
}

/// Sync the cache, resolve the default branch and materialize the workspace
async fn prepare_workspace(
    manager: &WorkspaceManager<CliGit>,
    spec: RepoSpec,
    tracker: &SharedTracker,
) -> Result<(RepoSpec, WorkspaceDir)> {
    let start = Instant::now();
    progress::emit(
        tracker,
        ProgressEvent::WorkspacePrepareBegin {
            id: ProgressTracker::next_event_id(),
            timestamp: ProgressTracker::current_timestamp(),
            spec: spec.slug(),
        },
    );

    let result = async {
        let cache = manager.ensure_cache(&spec).await?;
        let spec = if spec.branch_explicit {
            spec
        } else {
            let branch = manager.default_branch(&cache).await?;
            debug!("Resolved default branch {}", branch);
            spec.with_default_branch(&branch)
        };
        let workspace = manager.ensure_workspace(&spec).await?;
        Ok::<_, RenvError>((spec, workspace))
    }
    .await;

    let label = match &result {
        Ok((resolved, _)) => resolved.to_string(),
        Err(_) => String::new(),
    };
    progress::emit(
        tracker,
        ProgressEvent::WorkspacePrepareEnd {
            id: ProgressTracker::next_event_id(),
            timestamp: ProgressTracker::current_timestamp(),
            spec: label,
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.is_ok(),
        },
    );
    result.map_err(Into::into)
}
