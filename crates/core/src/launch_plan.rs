//! Launch plan assembly
//!
//! Resolves the capability list with an explicit three-stage pipeline
//! (merge, stable dedup, blacklist filter), derives the configuration
//! fingerprint from it, and assembles everything the build tool needs to
//! launch the container. Internal configuration keys are dropped here, so a
//! [`LaunchPlan`] never carries them.

use crate::config::RenvConfig;
use crate::container::ContainerIdentity;
use crate::repo_spec::RepoSpec;
use crate::workspace::WorkspaceDir;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Capabilities every environment gets: user mapping, image pull, git
/// integration, git clone support and ssh agent forwarding
pub const BASELINE_CAPABILITIES: [&str; 5] = ["user", "pull", "git", "git-clone", "ssh"];

/// Capabilities that are always removed: GPU passthrough and anything that
/// mirrors the caller's working directory (the workspace mount replaces it)
pub const FIXED_BLACKLIST: [&str; 3] = ["nvidia", "cwd", "create-dockerfile"];

/// Container environment variable holding the fingerprint
pub const FINGERPRINT_ENV: &str = "RENV_EXTENSIONS";

/// Keep-alive process for detached containers
pub const KEEP_ALIVE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Configuration keys consumed by renv itself
const INTERNAL_KEYS: [&str; 6] = [
    "extension-blacklist",
    "remote",
    "wait",
    "mount_root",
    "image",
    "args",
];

/// A bind mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    /// Mount options such as `Z` for SELinux relabeling
    pub options: Option<String>,
}

impl Mount {
    /// `host:container[:options]`
    pub fn to_volume_spec(&self) -> String {
        match &self.options {
            Some(opts) => format!("{}:{}:{}", self.host.display(), self.container, opts),
            None => format!("{}:{}", self.host.display(), self.container),
        }
    }
}

/// Caller-provided launch settings
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Rebuild without the layer cache
    pub nocache: bool,
    /// Host user name, substituted into the mount root
    pub user: String,
    /// Add `:Z` relabeling to mounts
    pub relabel: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            nocache: false,
            user: std::env::var("USER").unwrap_or_else(|_| "renv".to_string()),
            relabel: cfg!(target_os = "linux"),
        }
    }
}

/// Everything needed to launch one container
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub name: String,
    pub hostname: String,
    pub image: String,
    /// Resolved capabilities in first-seen order
    pub capabilities: Vec<String>,
    pub mounts: Vec<Mount>,
    pub env: IndexMap<String, String>,
    /// Working directory inside the container
    pub workdir: String,
    /// Run detached with a keep-alive process
    pub keep_alive: bool,
    /// Keep built images across invocations
    pub persist_image: bool,
    pub nocache: bool,
    /// Extra build tool options, internal keys already removed
    pub tool_options: IndexMap<String, serde_yaml::Value>,
    pub fingerprint: String,
}

/// Name part of a capability (`auto=~/src` is `auto`)
pub fn capability_name(capability: &str) -> &str {
    capability
        .split_once('=')
        .map(|(name, _)| name)
        .unwrap_or(capability)
        .trim()
}

/// Stage 1: concatenate capability layers in order
pub fn merge_capabilities(layers: &[&[String]]) -> Vec<String> {
    layers
        .iter()
        .flat_map(|layer| layer.iter())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Stage 2: drop repeated capability names, keeping the first occurrence
pub fn dedup_stable(capabilities: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    capabilities
        .into_iter()
        .filter(|c| seen.insert(capability_name(c).to_string()))
        .collect()
}

/// Stage 3: remove the fixed and user blacklists
pub fn filter_blacklist(capabilities: Vec<String>, blacklist: &[String]) -> Vec<String> {
    let blocked: HashSet<&str> = FIXED_BLACKLIST
        .iter()
        .copied()
        .chain(blacklist.iter().map(|b| capability_name(b)))
        .collect();
    capabilities
        .into_iter()
        .filter(|c| {
            let keep = !blocked.contains(capability_name(c));
            if !keep {
                debug!("Dropping blacklisted capability {}", c);
            }
            keep
        })
        .collect()
}

/// Baseline plus configured capabilities, deduplicated and filtered
pub fn resolve_capabilities(config: &RenvConfig) -> Vec<String> {
    let baseline: Vec<String> = BASELINE_CAPABILITIES.iter().map(|c| c.to_string()).collect();
    let merged = merge_capabilities(&[&baseline, &config.args]);
    filter_blacklist(dedup_stable(merged), &config.extension_blacklist)
}

/// Order-independent identifier of a capability set
pub fn fingerprint(capabilities: &[String]) -> String {
    capabilities
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(",")
}

/// Keys that only steer renv and must never reach the build tool
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with('_') || INTERNAL_KEYS.contains(&key)
}

/// Container path the workspace is mounted at
pub fn container_workspace_root(template: &str, user: &str, repo: &str) -> String {
    template.replace("{user}", user).replace("{repo}", repo)
}

/// Assemble the launch plan for `spec`
pub fn build(
    spec: &RepoSpec,
    identity: &ContainerIdentity,
    workspace: &WorkspaceDir,
    config: &RenvConfig,
    options: &LaunchOptions,
) -> LaunchPlan {
    let capabilities = resolve_capabilities(config);
    let fingerprint = fingerprint(&capabilities);

    let target = container_workspace_root(config.mount_root(), &options.user, &spec.repo);
    let mount_opts = options.relabel.then(|| "Z".to_string());

    // The whole copy is mounted so git inside the container sees the tree
    // exactly as its index records it; a subfolder only moves the workdir
    let mounts = vec![Mount {
        host: workspace.root.clone(),
        container: target.clone(),
        options: mount_opts,
    }];
    let workdir = match &spec.subfolder {
        Some(sub) => format!("{}/{}", target.trim_end_matches('/'), sub),
        None => target,
    };

    let mut env = IndexMap::new();
    env.insert(FINGERPRINT_ENV.to_string(), fingerprint.clone());

    let tool_options = config
        .options
        .iter()
        .filter(|(key, _)| {
            let internal = is_internal_key(key);
            if internal {
                warn!("Not forwarding internal configuration key '{}'", key);
            }
            !internal
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    LaunchPlan {
        name: identity.name.clone(),
        hostname: identity.hostname.clone(),
        image: config.image().to_string(),
        capabilities,
        mounts,
        env,
        workdir,
        keep_alive: true,
        persist_image: !options.nocache,
        nocache: options.nocache,
        tool_options,
        fingerprint,
    }
}
