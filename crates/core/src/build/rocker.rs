//! rocker CLI build tool
//!
//! Renders a [`LaunchPlan`] into rocker arguments and runs it detached. The
//! tool's stdout is passed through; stderr is echoed line by line and kept for
//! classification once the process exits.

use super::BuildTool;
use crate::errors::{DockerError, Result, RuntimeErrorKind};
use crate::launch_plan::{LaunchPlan, KEEP_ALIVE_COMMAND};
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use tracing::{debug, instrument, warn};

/// Default build tool binary
pub const DEFAULT_TOOL: &str = "rocker";

/// Option carrying extra `docker run` arguments through the build tool
const RUN_ARG_OPTION: &str = "oyr-run-arg";

fn tool_error(message: String) -> DockerError {
    DockerError::CommandFailed {
        kind: RuntimeErrorKind::Other,
        message,
    }
}

/// Build tool driven through the `rocker` command line
#[derive(Debug, Clone)]
pub struct CliBuildTool {
    tool_path: String,
}

impl CliBuildTool {
    pub fn new() -> Self {
        Self::with_tool_path(DEFAULT_TOOL)
    }

    pub fn with_tool_path(tool_path: impl Into<String>) -> Self {
        Self {
            tool_path: tool_path.into(),
        }
    }

    pub fn tool_path(&self) -> &str {
        &self.tool_path
    }

    /// Command-line arguments for `plan`
    pub fn render_args(plan: &LaunchPlan) -> Vec<String> {
        let mut args = Vec::new();
        let mut run_args = Vec::new();
        if plan.keep_alive {
            run_args.push("--detach".to_string());
        }
        args.extend(["--name".to_string(), plan.name.clone()]);
        args.extend(["--image-name".to_string(), plan.name.clone()]);
        args.extend(["--hostname".to_string(), plan.hostname.clone()]);

        for mount in &plan.mounts {
            args.push("--volume".to_string());
            args.push(mount.to_volume_spec());
        }
        for (key, value) in &plan.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        for capability in &plan.capabilities {
            args.push(format!("--{}", capability));
        }
        if plan.persist_image {
            args.push("--persist-image".to_string());
            args.push("--nocleanup".to_string());
        }
        if plan.nocache {
            args.push("--nocache".to_string());
        }

        for (key, value) in &plan.tool_options {
            if key == RUN_ARG_OPTION {
                run_args.extend(run_arg_values(value));
                continue;
            }
            let flag = format!("--{}", key);
            match value {
                serde_yaml::Value::Null | serde_yaml::Value::Bool(false) => {}
                serde_yaml::Value::Bool(true) => args.push(flag),
                serde_yaml::Value::Sequence(items) => {
                    for item in items {
                        if let Some(text) = scalar_text(item) {
                            args.push(flag.clone());
                            args.push(text);
                        }
                    }
                }
                other => match scalar_text(other) {
                    Some(text) => {
                        args.push(flag);
                        args.push(text);
                    }
                    None => warn!("Skipping build tool option '{}': unsupported value", key),
                },
            }
        }

        if !run_args.is_empty() {
            // Leading space keeps the value from parsing as a flag of its own
            args.push(format!("--{}", RUN_ARG_OPTION));
            args.push(format!(" {}", run_args.join(" ")));
        }

        args.push("--".to_string());
        args.push(plan.image.clone());
        if plan.keep_alive {
            args.extend(KEEP_ALIVE_COMMAND.iter().map(|s| s.to_string()));
        }
        args
    }
}

/// Docker run arguments from a configured `oyr-run-arg` value
fn run_arg_values(value: &serde_yaml::Value) -> Vec<String> {
    let items: Vec<&serde_yaml::Value> = match value {
        serde_yaml::Value::Sequence(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(scalar_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

impl Default for CliBuildTool {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl BuildTool for CliBuildTool {
    #[instrument(skip(self, plan), fields(name = %plan.name))]
    async fn launch(&self, plan: &LaunchPlan) -> Result<()> {
        let args = Self::render_args(plan);
        debug!("Build tool args: {}", shell_words::join(&args));

        let tool_path = self.tool_path.clone();
        let name = plan.name.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<(), DockerError> {
            let mut child = Command::new(&tool_path)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        DockerError::BuildToolNotInstalled {
                            tool: tool_path.clone(),
                        }
                    } else {
                        tool_error(format!("Failed to spawn {}: {}", tool_path, e))
                    }
                })?;

            let mut captured = String::new();
            if let Some(stderr) = child.stderr.take() {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    eprintln!("{}", line);
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }

            let status = child
                .wait()
                .map_err(|e| tool_error(format!("Failed to wait for {}: {}", tool_path, e)))?;
            if status.success() {
                debug!("Build tool launched {}", name);
                return Ok(());
            }

            let err = DockerError::from_stderr("Build tool failed", &captured);
            if err.kind() == RuntimeErrorKind::Conflict {
                return Err(DockerError::NameConflict { name });
            }
            Err(err)
        })
        .await
        .map_err(|e| tool_error(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }
}
