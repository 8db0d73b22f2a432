//! Configuration loading and layering
//!
//! Configuration comes from up to three layers, applied in order:
//!
//! 1. global `renv.yaml` in the root directory (or the file named by `RENV_CONFIG`)
//! 2. project `renv.yaml` / `rockerc.yaml` at the top of the checked-out repository
//! 3. command-line overrides
//!
//! Scalar keys are replaced by later layers. Capability lists and blacklists are
//! concatenated; ordering and dedup are handled by [`crate::launch_plan`].
//! Keys not recognized here are kept in [`RenvConfig::options`] and forwarded to
//! the build tool after internal keys are stripped.

use crate::errors::{ConfigError, RenvError, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

/// Overrides the root directory
pub const ROOT_ENV: &str = "RENV_DIR";
/// Overrides the global configuration file path
pub const CONFIG_ENV: &str = "RENV_CONFIG";
/// Overrides the remote URL template
pub const REMOTE_TEMPLATE_ENV: &str = "RENV_REMOTE_TEMPLATE";

/// Root directory name under the user's home
pub const DEFAULT_ROOT_NAME: &str = "renv";
/// Base image used when no layer names one
pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";
/// Container workspace root, `{user}` and `{repo}` are substituted
pub const DEFAULT_MOUNT_ROOT: &str = "/home/{user}/{repo}";
/// Global configuration file name inside the root directory
pub const GLOBAL_CONFIG_FILE: &str = "renv.yaml";
/// Project configuration file names, first match wins
pub const PROJECT_CONFIG_FILES: [&str; 2] = ["renv.yaml", "rockerc.yaml"];

/// Resolve the root directory: `RENV_DIR`, else `~/renv`
pub fn default_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ROOT_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    directories_next::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(DEFAULT_ROOT_NAME))
        .ok_or_else(|| {
            ConfigError::Validation {
                message: format!("Cannot determine home directory; set {}", ROOT_ENV),
            }
            .into()
        })
}

/// Bounded wait settings for the container to report running
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaitSettings {
    pub timeout_secs: Option<u64>,
    pub interval_ms: Option<u64>,
}

/// One configuration layer
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenvConfig {
    /// Base image reference
    pub image: Option<String>,
    /// Capability/extension names
    pub args: Vec<String>,
    /// Capabilities to remove after merging
    #[serde(rename = "extension-blacklist")]
    pub extension_blacklist: Vec<String>,
    /// Remote URL template with `{owner}`/`{repo}`
    pub remote: Option<String>,
    pub wait: Option<WaitSettings>,
    /// Container workspace root template
    pub mount_root: Option<String>,
    /// Every other key, forwarded to the build tool
    #[serde(flatten)]
    pub options: IndexMap<String, serde_yaml::Value>,
}

impl RenvConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            ConfigError::Parsing {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load a layer from `path`; `None` when the file does not exist
    #[instrument]
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| RenvError::io(path, e))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&content, path).map(Some)
    }

    /// Global layer: `RENV_CONFIG` if set, else `<root>/renv.yaml`
    pub fn load_global(root: &Path) -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(GLOBAL_CONFIG_FILE));
        Ok(Self::load(&path)?.unwrap_or_default())
    }

    /// Project layer from the first config file found in `repo_dir`
    pub fn load_project(repo_dir: &Path) -> Result<Self> {
        for name in PROJECT_CONFIG_FILES {
            if let Some(config) = Self::load(&repo_dir.join(name))? {
                return Ok(config);
            }
        }
        Ok(Self::default())
    }

    /// Apply `other` on top of `self`
    pub fn merge(mut self, other: RenvConfig) -> RenvConfig {
        if other.image.is_some() {
            self.image = other.image;
        }
        self.args.extend(other.args);
        self.extension_blacklist.extend(other.extension_blacklist);
        if other.remote.is_some() {
            self.remote = other.remote;
        }
        if let Some(wait) = other.wait {
            let base = self.wait.unwrap_or_default();
            self.wait = Some(WaitSettings {
                timeout_secs: wait.timeout_secs.or(base.timeout_secs),
                interval_ms: wait.interval_ms.or(base.interval_ms),
            });
        }
        if other.mount_root.is_some() {
            self.mount_root = other.mount_root;
        }
        for (key, value) in other.options {
            self.options.insert(key, value);
        }
        self
    }

    /// Effective base image
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// Effective remote URL template: `RENV_REMOTE_TEMPLATE`, then config, then default
    pub fn remote_template(&self) -> String {
        std::env::var(REMOTE_TEMPLATE_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.remote.clone())
            .unwrap_or_else(|| crate::workspace::DEFAULT_REMOTE_TEMPLATE.to_string())
    }

    /// Effective container workspace root template
    pub fn mount_root(&self) -> &str {
        self.mount_root.as_deref().unwrap_or(DEFAULT_MOUNT_ROOT)
    }

    /// Configured wait timeout, if any
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait
            .and_then(|w| w.timeout_secs)
            .map(Duration::from_secs)
    }

    /// Configured poll interval, if any
    pub fn wait_interval(&self) -> Option<Duration> {
        self.wait
            .and_then(|w| w.interval_ms)
            .map(Duration::from_millis)
    }
}

/// Command-line layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub image: Option<String>,
    pub extensions: Vec<String>,
    pub blacklist: Vec<String>,
}

impl From<CliOverrides> for RenvConfig {
    fn from(cli: CliOverrides) -> Self {
        RenvConfig {
            image: cli.image,
            args: cli.extensions,
            extension_blacklist: cli.blacklist,
            ..Default::default()
        }
    }
}

/// Merge global, project and CLI layers
pub fn resolve_layers(global: RenvConfig, project: RenvConfig, cli: CliOverrides) -> RenvConfig {
    global.merge(project).merge(cli.into())
}
