//! Deterministic names derived from a [`RepoSpec`]
//!
//! Every function here is pure: the same spec always yields the same container
//! name, hostname and on-disk paths. The `-sub-` token is reserved as the
//! branch/subfolder separator and is escaped out of sanitized branch names.

use crate::repo_spec::RepoSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Reserved separator between branch and subfolder in derived names
pub const SUBFOLDER_TOKEN: &str = "-sub-";

/// Maximum length of a derived container name
pub const MAX_NAME_LEN: usize = 128;

/// Maximum length of a hostname label
const MAX_HOSTNAME_LEN: usize = 63;

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9.-]").expect("Valid regex pattern"));

static LOSSLESS_SUBFOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9./]*$").expect("Valid regex pattern"));

/// Branch name made safe for container names and directory names.
///
/// Lowercased, `/` and any character outside `[a-z0-9.-]` become `-`, and any
/// occurrence of the reserved `-sub-` token is escaped to `-sub_-`.
pub fn safe_branch(branch: &str) -> String {
    let lowered = branch.trim().to_lowercase().replace('/', "-");
    let mut safe = UNSAFE_NAME_CHARS.replace_all(&lowered, "-").into_owned();
    while safe.contains(SUBFOLDER_TOKEN) {
        safe = safe.replace(SUBFOLDER_TOKEN, "-sub_-");
    }
    // "x-sub" followed by "-sub-y" would read as branch "x"
    if safe.ends_with("-sub") {
        safe.push('_');
    }
    safe
}

/// Subfolder path flattened into a single name segment.
///
/// Paths made only of `[a-z0-9.]` and `/` map one-to-one onto `-` separated
/// names. Anything else is lossy once flattened and gains `_` plus a short
/// hash of the raw path, which the lossless form can never contain.
pub fn safe_subfolder(subfolder: &str) -> String {
    let raw = subfolder.trim_matches('/');
    let flattened = raw.replace('/', "-");
    if LOSSLESS_SUBFOLDER.is_match(raw) {
        return flattened;
    }
    let lowered = flattened.to_lowercase();
    let safe = UNSAFE_NAME_CHARS.replace_all(&lowered, "-");
    format!("{}_{}", safe, short_hash(raw))
}

/// `{safe_branch}` or `{safe_branch}-sub-{safe_subfolder}`
fn branch_segment(spec: &RepoSpec) -> String {
    let branch = safe_branch(&spec.branch);
    match &spec.subfolder {
        Some(sub) => format!("{}{}{}", branch, SUBFOLDER_TOKEN, safe_subfolder(sub)),
        None => branch,
    }
}

/// Container name: `{repo}.{safe_branch}[-sub-{safe_subfolder}]`
pub fn container_name(spec: &RepoSpec) -> String {
    container_name_for_segment(&spec.repo, &branch_segment(spec))
}

/// Container name for a workspace found on disk under `{repo}/{segment}`
pub fn container_name_for_segment(repo: &str, segment: &str) -> String {
    bound_length(format!("{}.{}", repo, segment), MAX_NAME_LEN)
}

/// In-container hostname, the repo name only
pub fn hostname(spec: &RepoSpec) -> String {
    let mut host = spec.repo.clone();
    host.truncate(MAX_HOSTNAME_LEN);
    host.trim_end_matches('-').to_string()
}

/// Shared fetch cache for a repository: `{root}/.cache/{owner}/{repo}`
pub fn cache_dir(spec: &RepoSpec, root: &Path) -> PathBuf {
    root.join(".cache").join(&spec.owner).join(&spec.repo)
}

/// Workspace copy for one (branch, subfolder) pair:
/// `{root}/{owner}/{repo}/{segment}/{repo}`
pub fn workspace_dir(spec: &RepoSpec, root: &Path) -> PathBuf {
    root.join(&spec.owner)
        .join(&spec.repo)
        .join(branch_segment(spec))
        .join(&spec.repo)
}

/// Names longer than `max` keep a prefix and gain a short content hash
fn bound_length(name: String, max: usize) -> String {
    if name.len() <= max {
        return name;
    }
    let hash = short_hash(&name);
    let mut cut = max - hash.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &name[..cut], hash)
}

/// First 4 bytes of the SHA-256 of `input`, hex encoded
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}
