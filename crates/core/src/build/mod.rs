//! External container build tool boundary
//!
//! A [`BuildTool`] takes a [`LaunchPlan`] and either launches a detached
//! container under the plan's name or fails. A name clash surfaces as
//! [`crate::errors::DockerError::NameConflict`]; everything else is a plain
//! runtime error.

use crate::errors::Result;
use crate::launch_plan::LaunchPlan;

pub mod rocker;

/// Builds an image for a plan and launches the container
#[allow(async_fn_in_trait)]
pub trait BuildTool {
    /// Build and start the container described by `plan`
    async fn launch(&self, plan: &LaunchPlan) -> Result<()>;
}

impl<T: BuildTool> BuildTool for &T {
    async fn launch(&self, plan: &LaunchPlan) -> Result<()> {
        (*self).launch(plan).await
    }
}

pub mod mock {
    //! Recording build tool that creates containers in a [`MockDocker`]

    use super::BuildTool;
    use crate::docker::mock::MockDocker;
    use crate::errors::{DockerError, Result, RuntimeErrorKind};
    use crate::launch_plan::LaunchPlan;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct MockBuildTool {
        docker: MockDocker,
        invocations: Arc<Mutex<Vec<LaunchPlan>>>,
        failure: Arc<Mutex<Option<String>>>,
    }

    impl MockBuildTool {
        pub fn new(docker: MockDocker) -> Self {
            Self {
                docker,
                invocations: Arc::new(Mutex::new(Vec::new())),
                failure: Arc::new(Mutex::new(None)),
            }
        }

        /// Make every launch fail with `stderr`
        pub fn fail_with(&self, stderr: &str) {
            *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(stderr.to_string());
        }

        /// Plans passed to `launch`, in order
        pub fn invocations(&self) -> Vec<LaunchPlan> {
            self.invocations
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()
        }

        pub fn invocation_count(&self) -> usize {
            self.invocations().len()
        }
    }

    impl BuildTool for MockBuildTool {
        async fn launch(&self, plan: &LaunchPlan) -> Result<()> {
            self.invocations
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(plan.clone());
            if let Some(stderr) = self
                .failure
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()
            {
                let err = DockerError::from_stderr("Build tool failed", &stderr);
                if err.kind() == RuntimeErrorKind::Conflict {
                    return Err(DockerError::NameConflict {
                        name: plan.name.clone(),
                    }
                    .into());
                }
                return Err(err.into());
            }
            let env = plan
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mount_source = plan.mounts.first().map(|m| m.host.clone());
            self.docker
                .register_created(&plan.name, &plan.image, env, mount_source)
        }
    }
}
