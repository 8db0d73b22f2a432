//! Repository specification parsing
//!
//! Parses `owner/repo[@branch][#subfolder/path]` into a normalized [`RepoSpec`].
//! Owner and repo are case-folded and restricted to `[a-z0-9-]` so they are safe
//! as container name and hostname components. Branch case is preserved for git.

use crate::errors::ParseError;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Branch assumed when the spec omits `@branch`, until the repository's
/// actual default branch is known.
pub const DEFAULT_BRANCH: &str = "main";

/// Identity of a requested environment.
///
/// Equality covers the normalized (owner, repo, branch, subfolder) only; how
/// the spec was typed never makes two environments different.
#[derive(Debug, Clone)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub subfolder: Option<String>,
    /// Whether the branch was given explicitly with `@`
    pub branch_explicit: bool,
    /// Owner and repo as typed, used only to build the remote URL
    pub upstream: (String, String),
}

impl RepoSpec {
    /// Parse a user-supplied specification string
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();

        let (head, subfolder) = match trimmed.split_once('#') {
            Some((head, sub)) => (head, normalize_subfolder(sub)?),
            None => (trimmed, None),
        };

        let (owner_repo, branch) = match head.split_once('@') {
            Some((owner_repo, branch)) => (owner_repo, Some(branch.trim())),
            None => (head, None),
        };

        let (raw_owner, raw_repo) =
            owner_repo
                .split_once('/')
                .ok_or_else(|| ParseError::MissingSeparator {
                    input: input.to_string(),
                })?;
        if raw_repo.contains('/') {
            return Err(ParseError::UnexpectedSeparator {
                input: input.to_string(),
            });
        }

        let owner = sanitize_component(raw_owner);
        let repo = sanitize_component(raw_repo);
        if owner.is_empty() || repo.is_empty() {
            return Err(ParseError::EmptyComponent {
                input: input.to_string(),
            });
        }

        let (branch, branch_explicit) = match branch {
            Some(b) if !b.is_empty() => (b.to_string(), true),
            _ => (DEFAULT_BRANCH.to_string(), false),
        };

        Ok(Self {
            owner,
            repo,
            branch,
            subfolder,
            branch_explicit,
            upstream: (raw_owner.trim().to_string(), raw_repo.trim().to_string()),
        })
    }

    /// Replace an implicit branch with the repository's resolved default branch.
    ///
    /// An explicitly requested branch is never replaced.
    pub fn with_default_branch(mut self, default_branch: &str) -> Self {
        if !self.branch_explicit && !default_branch.is_empty() {
            self.branch = default_branch.to_string();
        }
        self
    }

    /// `owner/repo` pair
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl PartialEq for RepoSpec {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.repo == other.repo
            && self.branch == other.branch
            && self.subfolder == other.subfolder
    }
}

impl Eq for RepoSpec {}

impl Hash for RepoSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.repo.hash(state);
        self.branch.hash(state);
        self.subfolder.hash(state);
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)?;
        if let Some(sub) = &self.subfolder {
            write!(f, "#{}", sub)?;
        }
        Ok(())
    }
}

/// Lowercase and restrict to `[a-z0-9-]`, collapsing runs of replaced
/// characters into a single dash and trimming dashes at the edges.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

fn normalize_subfolder(raw: &str) -> Result<Option<String>, ParseError> {
    let parts: Vec<&str> = raw
        .trim()
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        return Ok(None);
    }
    if parts.iter().any(|p| *p == "..") {
        return Err(ParseError::InvalidSubfolder {
            path: raw.to_string(),
        });
    }
    Ok(Some(parts.join("/")))
}
