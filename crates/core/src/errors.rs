//! Error types and handling
//!
//! Each domain (spec parsing, version control, container runtime, configuration)
//! has its own error enum. They are wrapped in [`RenvError`] for unified handling,
//! and [`RenvError::exit_code`] maps setup failures to stable process exit codes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Repository spec parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `/` between owner and repo
    #[error("Invalid repository spec '{input}': expected owner/repo[@branch][#subfolder]")]
    MissingSeparator { input: String },

    /// Owner or repo is empty once sanitized
    #[error("Invalid repository spec '{input}': owner and repo must not be empty")]
    EmptyComponent { input: String },

    /// More than one `/` in the owner/repo part
    #[error("Invalid repository spec '{input}': owner/repo must contain exactly one '/'")]
    UnexpectedSeparator { input: String },

    /// Subfolder escapes the repository root
    #[error("Invalid subfolder '{path}': must be a relative path inside the repository")]
    InvalidSubfolder { path: String },
}

impl ParseError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::MissingSeparator { .. } => "missing-separator",
            ParseError::EmptyComponent { .. } => "empty-component",
            ParseError::UnexpectedSeparator { .. } => "unexpected-separator",
            ParseError::InvalidSubfolder { .. } => "invalid-subfolder",
        }
    }
}

/// Git-related errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Git is not installed or not accessible
    #[error("Git is not installed or not accessible")]
    NotInstalled,

    /// Remote could not be reached
    #[error("Network error during git {operation} in {}: {message}. Check your connection and retry.", dir.display())]
    Network {
        operation: String,
        dir: PathBuf,
        message: String,
    },

    /// Remote rejected our credentials
    #[error("Authentication failed during git {operation} in {}: {message}. Check your SSH agent or credentials.", dir.display())]
    Auth {
        operation: String,
        dir: PathBuf,
        message: String,
    },

    /// Requested subfolder is missing from the checked-out tree
    #[error("Subfolder not found in repository: {path}")]
    SubfolderNotFound { path: String },

    /// Any other git failure, wrapped with operation and directory
    #[error("git {operation} failed in {}: {message}", dir.display())]
    CommandFailed {
        operation: String,
        dir: PathBuf,
        message: String,
    },
}

/// Classification of container runtime stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Name already in use by another container
    Conflict,
    /// Backing mount of the container no longer exists on the host
    MountNamespaceViolation,
    /// Container does not exist
    NotFound,
    /// Removal or stop already in progress
    InProgress,
    Other,
}

/// Docker/Runtime-related errors
#[derive(Error, Debug)]
pub enum DockerError {
    /// Docker is not installed or not accessible
    #[error("Container runtime is not installed or not accessible")]
    NotInstalled,

    /// Runtime CLI command error
    #[error("Runtime CLI error: {message}")]
    CommandFailed {
        kind: RuntimeErrorKind,
        message: String,
    },

    /// Another container already uses this name
    #[error("Container name '{name}' is already in use; another invocation may be creating it")]
    NameConflict { name: String },

    /// Container did not reach the running state in time
    #[error("Container '{name}' did not report running within {timeout:?}")]
    LaunchTimeout { name: String, timeout: Duration },

    /// TTY allocation failed
    #[error("TTY allocation failed: {reason}")]
    TTYFailed { reason: String },

    /// External build tool binary is missing
    #[error("Build tool '{tool}' is not installed or not on PATH")]
    BuildToolNotInstalled { tool: String },
}

impl DockerError {
    /// Build a command failure, classifying the runtime's stderr
    pub fn from_stderr(context: &str, stderr: &str) -> Self {
        DockerError::CommandFailed {
            kind: classify_runtime_error(stderr),
            message: format!("{}: {}", context, stderr.trim()),
        }
    }

    /// Classification of this error, `Other` for non-CLI variants
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            DockerError::CommandFailed { kind, .. } => *kind,
            DockerError::NameConflict { .. } => RuntimeErrorKind::Conflict,
            _ => RuntimeErrorKind::Other,
        }
    }
}

/// Map runtime stderr text onto a [`RuntimeErrorKind`].
///
/// This is the only place raw runtime error text is inspected.
pub fn classify_runtime_error(stderr: &str) -> RuntimeErrorKind {
    let lower = stderr.to_lowercase();
    if lower.contains("outside of container mount namespace")
        || lower.contains("mount namespace root")
        || lower.contains("possible container breakout")
        || lower.contains("bind source path does not exist")
    {
        RuntimeErrorKind::MountNamespaceViolation
    } else if lower.contains("is already in use") || lower.contains("conflict") {
        RuntimeErrorKind::Conflict
    } else if lower.contains("already in progress") {
        RuntimeErrorKind::InProgress
    } else if lower.contains("no such container") || lower.contains("no such object") {
        RuntimeErrorKind::NotFound
    } else {
        RuntimeErrorKind::Other
    }
}

/// Git stderr classification used to tell network from auth failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFailureKind {
    Network,
    Auth,
    Other,
}

/// Map git stderr text onto a [`GitFailureKind`]
pub fn classify_git_error(stderr: &str) -> GitFailureKind {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied (publickey")
        || lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("host key verification failed")
    {
        GitFailureKind::Auth
    } else if lower.contains("could not resolve host")
        || lower.contains("connection timed out")
        || lower.contains("connection refused")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("could not read from remote repository")
    {
        GitFailureKind::Network
    } else {
        GitFailureKind::Other
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file {}: {message}", path.display())]
    Parsing { path: PathBuf, message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),
}

/// Main error type for renv
#[derive(Error, Debug)]
pub enum RenvError {
    /// Repository spec parsing errors
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Git-related errors
    #[error("{0}")]
    Git(#[from] GitError),

    /// Docker/Runtime-related errors
    #[error("{0}")]
    Docker(#[from] DockerError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem errors outside of git
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenvError {
    /// Wrap an I/O error with the path it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenvError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            RenvError::Parse(_) => 2,
            RenvError::Git(GitError::SubfolderNotFound { .. }) => 3,
            RenvError::Git(GitError::Network { .. }) | RenvError::Git(GitError::Auth { .. }) => 4,
            RenvError::Docker(DockerError::NameConflict { .. }) => 5,
            RenvError::Docker(DockerError::LaunchTimeout { .. }) => 6,
            _ => 1,
        }
    }
}

/// Convenience type alias for Results with RenvError
pub type Result<T> = std::result::Result<T, RenvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_reasons() {
        let err = ParseError::MissingSeparator {
            input: "repo".to_string(),
        };
        assert_eq!(err.reason(), "missing-separator");
        let err = ParseError::EmptyComponent {
            input: "/repo".to_string(),
        };
        assert_eq!(err.reason(), "empty-component");
    }

    #[test]
    fn test_classify_runtime_error() {
        assert_eq!(
            classify_runtime_error(
                "Error response from daemon: Conflict. The container name \"/r.main\" is already in use"
            ),
            RuntimeErrorKind::Conflict
        );
        assert_eq!(
            classify_runtime_error(
                "OCI runtime exec failed: current working directory is outside of container mount namespace root -- possible container breakout detected"
            ),
            RuntimeErrorKind::MountNamespaceViolation
        );
        assert_eq!(
            classify_runtime_error("Error: No such container: r.main"),
            RuntimeErrorKind::NotFound
        );
        assert_eq!(
            classify_runtime_error("removal of container r.main is already in progress"),
            RuntimeErrorKind::InProgress
        );
        assert_eq!(
            classify_runtime_error("something else"),
            RuntimeErrorKind::Other
        );
    }

    #[test]
    fn test_classify_git_error() {
        assert_eq!(
            classify_git_error("git@github.com: Permission denied (publickey)."),
            GitFailureKind::Auth
        );
        assert_eq!(
            classify_git_error("ssh: Could not resolve host: github.com"),
            GitFailureKind::Network
        );
        assert_eq!(
            classify_git_error("fatal: not a git repository"),
            GitFailureKind::Other
        );
    }

    #[test]
    fn test_exit_codes() {
        let parse: RenvError = ParseError::MissingSeparator {
            input: "x".to_string(),
        }
        .into();
        assert_eq!(parse.exit_code(), 2);

        let missing: RenvError = GitError::SubfolderNotFound {
            path: "missing/path".to_string(),
        }
        .into();
        assert_eq!(missing.exit_code(), 3);
        assert!(missing.to_string().contains("not found"));
        assert!(missing.to_string().contains("missing/path"));

        let timeout: RenvError = DockerError::LaunchTimeout {
            name: "r.main".to_string(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert_eq!(timeout.exit_code(), 6);

        let conflict: RenvError = DockerError::NameConflict {
            name: "r.main".to_string(),
        }
        .into();
        assert_eq!(conflict.exit_code(), 5);
    }
}
