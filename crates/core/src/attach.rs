//! Attach/execute driver
//!
//! Runs either an interactive shell or a single command inside a running
//! container. The process working directory is moved into the host workspace
//! first: attaching from a directory outside the container's mounts is what
//! triggers the runtime's mount-namespace error.

use crate::docker::{Docker, ExecConfig};
use crate::errors::{RenvError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

/// Shell started when no command is given
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Runs sessions and commands in a container
#[derive(Debug)]
pub struct AttachDriver<'a, D: Docker> {
    docker: &'a D,
}

impl<'a, D: Docker> AttachDriver<'a, D> {
    pub fn new(docker: &'a D) -> Self {
        Self { docker }
    }

    /// Attach to `name` and return the exit code of the shell or command.
    ///
    /// `workdir` is the path inside the container, `host_dir` the workspace on
    /// the host the process moves into beforehand. `terminal` requests a TTY
    /// for interactive sessions.
    #[instrument(skip(self, command))]
    pub async fn run(
        &self,
        name: &str,
        workdir: &str,
        host_dir: &Path,
        command: Option<&[String]>,
        terminal: bool,
    ) -> Result<i32> {
        std::env::set_current_dir(host_dir).map_err(|e| RenvError::io(host_dir, e))?;

        let (argv, config) = match command {
            Some(cmd) if !cmd.is_empty() => (
                cmd.to_vec(),
                ExecConfig {
                    working_dir: Some(workdir.to_string()),
                    env: HashMap::new(),
                    tty: false,
                    interactive: false,
                    silent: false,
                },
            ),
            _ => (
                vec![DEFAULT_SHELL.to_string()],
                ExecConfig {
                    working_dir: Some(workdir.to_string()),
                    env: HashMap::new(),
                    tty: terminal,
                    interactive: true,
                    silent: false,
                },
            ),
        };

        debug!("Attaching to {}: {}", name, shell_words::join(&argv));
        let result = self.docker.exec(name, &argv, config).await?;
        debug!("Command in {} exited with {}", name, result.exit_code);
        Ok(result.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::{MockContainer, MockDocker, MockDockerConfig};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests that move the process working directory
    static CWD_MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn test_command_runs_non_interactively_and_returns_code() {
        let _guard = CWD_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        let dir = TempDir::new().unwrap();
        let docker = MockDocker::with_config(MockDockerConfig {
            exec_exit_code: 3,
            ..Default::default()
        });
        docker.add_container(MockContainer::new("r.main", "img"));
        let cwd = std::env::current_dir().unwrap();

        let driver = AttachDriver::new(&docker);
        let command = vec!["make".to_string(), "test".to_string()];
        let code = driver
            .run("r.main", "/home/dev/r", dir.path(), Some(&command), true)
            .await
            .unwrap();
        std::env::set_current_dir(cwd).unwrap();

        assert_eq!(code, 3);
        let history = docker.exec_history();
        assert_eq!(history[0].command, command);
        assert!(!history[0].config.tty);
        assert!(!history[0].config.interactive);
        assert_eq!(history[0].config.working_dir.as_deref(), Some("/home/dev/r"));
    }

    #[tokio::test]
    async fn test_no_command_opens_shell() {
        let _guard = CWD_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        let dir = TempDir::new().unwrap();
        let docker = MockDocker::new();
        docker.add_container(MockContainer::new("r.main", "img"));
        let cwd = std::env::current_dir().unwrap();

        let driver = AttachDriver::new(&docker);
        let code = driver
            .run("r.main", "/home/dev/r", dir.path(), None, true)
            .await
            .unwrap();
        std::env::set_current_dir(cwd).unwrap();

        assert_eq!(code, 0);
        let history = docker.exec_history();
        assert_eq!(history[0].command, vec![DEFAULT_SHELL]);
        assert!(history[0].config.tty);
        assert!(history[0].config.interactive);
    }

    #[tokio::test]
    async fn test_missing_host_dir_fails() {
        let docker = MockDocker::new();
        let driver = AttachDriver::new(&docker);
        let err = driver
            .run("r.main", "/w", Path::new("/nonexistent/renv/ws"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RenvError::Io { .. }));
    }
}
