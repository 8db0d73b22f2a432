//! Integration tests for the full prepare-and-launch flow without Docker
//!
//! Cache, workspace, launch plan and lifecycle controller are composed the way
//! the CLI composes them, with MockVcs, MockDocker and MockBuildTool standing in
//! for git, the container runtime and rocker.

use renv_core::build::mock::MockBuildTool;
use renv_core::build::rocker::CliBuildTool;
use renv_core::config::RenvConfig;
use renv_core::container::{ContainerIdentity, ContainerState};
use renv_core::container_lifecycle::{
    LifecycleController, LifecycleOptions, LifecycleOutcome, WaitPolicy,
};
use renv_core::docker::mock::{MockDocker, MockDockerConfig};
use renv_core::docker::Docker;
use renv_core::errors::{GitError, RenvError, Result};
use renv_core::git::mock::MockVcs;
use renv_core::launch_plan::{self, LaunchOptions, LaunchPlan};
use renv_core::repo_spec::RepoSpec;
use renv_core::workspace::WorkspaceManager;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    _root: TempDir,
    vcs: MockVcs,
    docker: MockDocker,
    builder: MockBuildTool,
    manager: WorkspaceManager<MockVcs>,
}

impl TestEnv {
    fn new(vcs: MockVcs, docker_config: MockDockerConfig) -> Self {
        let root = TempDir::new().unwrap();
        let docker = MockDocker::with_config(docker_config);
        let builder = MockBuildTool::new(docker.clone());
        let manager = WorkspaceManager::new(vcs.clone(), root.path());
        Self {
            _root: root,
            vcs,
            docker,
            builder,
            manager,
        }
    }

    fn with_default_remote() -> Self {
        Self::new(
            MockVcs::new().with_ref("refs/remotes/origin/main"),
            MockDockerConfig::default(),
        )
    }

    fn root(&self) -> &Path {
        self.manager.root()
    }
}

fn options() -> LifecycleOptions {
    LifecycleOptions {
        wait: WaitPolicy {
            timeout: Duration::from_millis(100),
            interval: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

fn launch_options() -> LaunchOptions {
    LaunchOptions {
        nocache: false,
        user: "dev".to_string(),
        relabel: false,
    }
}

/// One CLI invocation: sync cache, resolve branch, prepare workspace, plan, lifecycle
async fn invoke(
    env: &TestEnv,
    input: &str,
    config: &RenvConfig,
    lifecycle: LifecycleOptions,
) -> Result<(RepoSpec, LaunchPlan, LifecycleOutcome)> {
    let spec = RepoSpec::parse(input)?;
    let cache = env.manager.ensure_cache(&spec).await?;
    let spec = if spec.branch_explicit {
        spec
    } else {
        let branch = env.manager.default_branch(&cache).await?;
        spec.with_default_branch(&branch)
    };
    let workspace = env.manager.ensure_workspace(&spec).await?;
    let identity = ContainerIdentity::new(&spec, env.root());
    let plan = launch_plan::build(&spec, &identity, &workspace, config, &launch_options());
    let outcome = LifecycleController::new(&env.docker, &env.builder, &env.manager, lifecycle)
        .ensure_running(&spec, &plan)
        .await?;
    Ok((spec, plan, outcome))
}

#[tokio::test]
async fn test_second_invocation_reuses_without_building() {
    let env = TestEnv::with_default_remote();
    let config = RenvConfig::default();

    let (_, plan, first) = invoke(&env, "blooop/test_renv", &config, options())
        .await
        .unwrap();
    assert_eq!(first, LifecycleOutcome::Created);
    assert_eq!(plan.name, "test-renv.main");

    let (_, _, second) = invoke(&env, "blooop/test_renv", &config, options())
        .await
        .unwrap();
    assert_eq!(second, LifecycleOutcome::Reused);
    assert_eq!(env.builder.invocation_count(), 1);
    assert_eq!(env.vcs.calls_to("clone").len(), 1);
}

#[tokio::test]
async fn test_capability_change_rebuilds_then_reuses() {
    let env = TestEnv::with_default_remote();
    invoke(&env, "o/r", &RenvConfig::default(), options())
        .await
        .unwrap();

    let with_x11 = RenvConfig {
        args: vec!["x11".to_string()],
        ..Default::default()
    };
    let (_, _, outcome) = invoke(&env, "o/r", &with_x11, options()).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Rebuilt);
    assert_eq!(env.builder.invocation_count(), 2);

    // Same effective set in a different order is not a change
    let reordered = RenvConfig {
        args: vec!["x11".to_string(), "git".to_string(), "user".to_string()],
        ..Default::default()
    };
    let (_, _, outcome) = invoke(&env, "o/r", &reordered, options()).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Reused);
    assert_eq!(env.builder.invocation_count(), 2);
}

#[tokio::test]
async fn test_deleted_workspace_is_recovered() {
    let env = TestEnv::with_default_remote();
    let config = RenvConfig::default();
    let (spec, plan, _) = invoke(&env, "o/r@main", &config, options()).await.unwrap();

    let ws = env.manager.workspace_dir(&spec);
    std::fs::remove_dir_all(&ws).unwrap();
    env.docker.mark_mount_stale(&plan.name);

    let (_, _, outcome) = invoke(&env, "o/r@main", &config, options()).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Recovered);
    assert!(ws.join(".git").exists());
    assert_eq!(env.builder.invocation_count(), 2);

    let info = env
        .docker
        .inspect_container(&plan.name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, ContainerState::Running);
    assert!(!env.docker.container(&plan.name).unwrap().mount_stale);
}

#[tokio::test]
async fn test_stopped_container_with_lost_workspace_is_recovered() {
    let env = TestEnv::with_default_remote();
    let config = RenvConfig::default();
    let (spec, plan, _) = invoke(&env, "o/r@main", &config, options()).await.unwrap();

    env.docker.stop_container(&plan.name, None).await.unwrap();
    std::fs::remove_dir_all(env.manager.workspace_dir(&spec)).unwrap();
    env.docker.mark_mount_stale(&plan.name);

    let (_, _, outcome) = invoke(&env, "o/r@main", &config, options()).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Recovered);
    assert!(env.docker.calls().contains(&format!("start {}", plan.name)));
}

#[tokio::test]
async fn test_name_conflict_is_surfaced() {
    let env = TestEnv::with_default_remote();
    env.builder.fail_with(
        "docker: Error response from daemon: Conflict. The container name \"/r.main\" is already in use by container \"abc\".",
    );
    let err = invoke(&env, "o/r@main", &RenvConfig::default(), options())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("r.main"));
}

#[tokio::test]
async fn test_launch_timeout_is_fatal() {
    let env = TestEnv::new(
        MockVcs::new().with_ref("refs/remotes/origin/main"),
        MockDockerConfig {
            never_running: true,
            ..Default::default()
        },
    );
    let err = invoke(&env, "o/r@main", &RenvConfig::default(), options())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 6);
    assert_eq!(env.builder.invocation_count(), 1);
}

#[tokio::test]
async fn test_missing_subfolder_creates_nothing() {
    let env = TestEnv::with_default_remote();
    let err = invoke(&env, "owner/repo#missing/path", &RenvConfig::default(), options())
        .await
        .unwrap_err();

    match &err {
        RenvError::Git(GitError::SubfolderNotFound { path }) => assert_eq!(path, "missing/path"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("not found"));
    assert!(err.to_string().contains("missing/path"));
    assert_eq!(env.builder.invocation_count(), 0);
    assert!(env.docker.calls().is_empty());
    assert!(env.vcs.calls_to("sparse_checkout").is_empty());
    assert!(!env
        .root()
        .join("owner/repo/main-sub-missing-path")
        .exists());
}

#[tokio::test]
async fn test_subfolder_environment_is_independent() {
    let env = TestEnv::new(
        MockVcs::new()
            .with_ref("refs/remotes/origin/main")
            .with_path("a/b"),
        MockDockerConfig::default(),
    );
    let config = RenvConfig::default();

    let (_, full, _) = invoke(&env, "o/r@main", &config, options()).await.unwrap();
    let (_, sub, outcome) = invoke(&env, "o/r@main#a/b", &config, options())
        .await
        .unwrap();

    assert_eq!(outcome, LifecycleOutcome::Created);
    assert_ne!(full.name, sub.name);
    assert_eq!(sub.name, "r.main-sub-a-b");
    assert_eq!(sub.mounts.len(), 1);
    assert!(sub.mounts[0].host.ends_with("main-sub-a-b/r"));
    assert_eq!(sub.workdir, format!("{}/a/b", sub.mounts[0].container));
    assert_eq!(env.vcs.calls_to("sparse_checkout"), vec!["sparse_checkout a/b"]);
}

#[tokio::test]
async fn test_internal_keys_never_reach_build_tool() {
    let env = TestEnv::with_default_remote();
    let config = RenvConfig::from_yaml_str(
        "network: host\n_renv_target_dir: /tmp/x\nextension-blacklist: [ssh]\nmount_root: /w/{repo}\n",
        Path::new("renv.yaml"),
    )
    .unwrap();
    invoke(&env, "o/r@main", &config, options()).await.unwrap();

    let plan = &env.builder.invocations()[0];
    let args = CliBuildTool::render_args(plan);
    assert!(args.iter().any(|a| a == "--network"));
    assert!(!args.iter().any(|a| a.contains("_renv")));
    assert!(!args.iter().any(|a| a.contains("extension-blacklist")));
    assert!(!args.iter().any(|a| a == "--mount_root"));
    assert!(!args.iter().any(|a| a == "--ssh"));
    assert_eq!(plan.workdir, "/w/r");
}

#[tokio::test]
async fn test_force_rebuilds_existing_container() {
    let env = TestEnv::with_default_remote();
    invoke(&env, "o/r@main", &RenvConfig::default(), options())
        .await
        .unwrap();
    let forced = LifecycleOptions {
        force: true,
        ..options()
    };
    let (_, _, outcome) = invoke(&env, "o/r@main", &RenvConfig::default(), forced)
        .await
        .unwrap();
    assert_eq!(outcome, LifecycleOutcome::Rebuilt);
    assert_eq!(
        env.docker.calls(),
        vec!["create r.main", "stop r.main", "remove r.main", "create r.main"]
    );
}
