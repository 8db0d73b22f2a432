use crate::commands::install::execute_install;
use crate::commands::launch::{execute_launch, LaunchArgs};
use crate::commands::manage::{complete_branches, complete_repos, execute_list, execute_remove};
use crate::ui::spinner::SpinnerEmitter;
use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use renv_core::config::CliOverrides;
use renv_core::progress::{ProgressTracker, SharedTracker};
use std::sync::{Arc, Mutex};

/// Runtime selection options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum RuntimeOption {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl From<RuntimeOption> for renv_core::runtime::RuntimeKind {
    fn from(runtime: RuntimeOption) -> Self {
        match runtime {
            RuntimeOption::Docker => renv_core::runtime::RuntimeKind::Docker,
            RuntimeOption::Podman => renv_core::runtime::RuntimeKind::Podman,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Per-branch development environments in containers
#[derive(Debug, Parser)]
#[command(name = "renv")]
#[command(about = "Per-branch development environments in containers")]
#[command(
    long_about = "Clone owner/repo into a shared cache, give each branch (and subfolder) its own \
                  independent workspace copy, and attach to a container built for it.\n\n\
                  Examples:\n  renv blooop/test_renv\n  renv blooop/test_renv@feature/x\n  \
                  renv org/monorepo@main#services/api -- make test"
)]
#[command(version)]
pub struct Cli {
    /// Repository to work on: owner/repo[@branch][#subfolder]
    #[arg(value_name = "SPEC")]
    pub spec: Option<String>,

    /// Command to run in the container instead of an interactive shell
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Stop and rebuild the container even if it is usable
    #[arg(short, long)]
    pub force: bool,

    /// Rebuild the container without the image layer cache
    #[arg(long)]
    pub nocache: bool,

    /// Only prepare the workspace and print its path
    #[arg(long)]
    pub no_container: bool,

    /// Install bash completion
    #[arg(long)]
    pub install: bool,

    /// List environments on disk with their container state
    #[arg(long)]
    pub list: bool,

    /// Stop and remove the container for SPEC, keeping the workspace
    #[arg(long, conflicts_with = "prune", requires = "spec")]
    pub destroy: bool,

    /// Remove the container for SPEC and delete its workspace copy
    #[arg(long, requires = "spec")]
    pub prune: bool,

    /// Extra capability to enable (repeatable)
    #[arg(long = "ext", value_name = "NAME")]
    pub extensions: Vec<String>,

    /// Capability to remove (repeatable)
    #[arg(long, value_name = "NAME")]
    pub blacklist: Vec<String>,

    /// Base image override
    #[arg(long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Container runtime to use (docker or podman, can be set via RENV_RUNTIME env var)
    #[arg(long, value_enum)]
    pub runtime: Option<RuntimeOption>,

    /// Log format (text or json, can be set via RENV_LOG_FORMAT env var)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level (defaults to warn; RENV_LOG or RUST_LOG give finer control)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Print cached owner/repo pairs (used by shell completion)
    #[arg(long, hide = true)]
    pub complete_repos: bool,

    /// Print cached branches of OWNER/REPO (used by shell completion)
    #[arg(long, hide = true, value_name = "OWNER/REPO")]
    pub complete_branches: Option<String>,
}

impl Cli {
    /// Run the selected action and return the process exit code
    pub async fn dispatch(self) -> Result<i32> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        let filter = self
            .log_level
            .as_ref()
            .map(|level| renv_core::logging::level_directive(level.as_str()));
        renv_core::logging::init(log_format, filter.as_deref(), "warn")?;
        tracing::debug!("CLI initialized");

        if self.install {
            execute_install()?;
            return Ok(0);
        }
        if self.complete_repos {
            complete_repos()?;
            return Ok(0);
        }
        if let Some(slug) = self.complete_branches.as_deref() {
            complete_branches(slug).await?;
            return Ok(0);
        }

        let runtime = self.runtime.map(Into::into);
        if self.list {
            execute_list(runtime).await?;
            return Ok(0);
        }

        let Some(spec) = self.spec.clone() else {
            Cli::command()
                .error(
                    clap::error::ErrorKind::MissingRequiredArgument,
                    "a repository spec is required: owner/repo[@branch][#subfolder]",
                )
                .exit();
        };

        if self.destroy || self.prune {
            execute_remove(&spec, self.prune, runtime).await?;
            return Ok(0);
        }

        // Spinner only on an interactive stderr with text logs
        let json_format = matches!(log_format, Some("json"))
            || std::env::var(renv_core::logging::LOG_FORMAT_ENV).is_ok_and(|f| f == "json");
        let progress: SharedTracker = if atty::is(atty::Stream::Stderr) && !json_format {
            Arc::new(Mutex::new(ProgressTracker::new(Some(Box::new(
                SpinnerEmitter::new(),
            )))))
        } else {
            Arc::new(Mutex::new(ProgressTracker::silent()))
        };

        let args = LaunchArgs {
            spec,
            command: self.command,
            force: self.force,
            nocache: self.nocache,
            no_container: self.no_container,
            overrides: CliOverrides {
                image: self.image,
                extensions: self.extensions,
                blacklist: self.blacklist,
            },
            runtime,
            progress,
        };
        execute_launch(args).await
    }
}
