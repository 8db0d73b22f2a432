//! Bash completion installation
//!
//! The completion script asks the binary itself for candidates through the
//! hidden `--complete-repos` and `--complete-branches` flags, so it never goes
//! stale. Installation writes the script to a file and keeps exactly one
//! managed `source` block in the shell rc file.

use crate::errors::{ConfigError, RenvError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Overrides the completion script location
pub const COMPLETION_FILE_ENV: &str = "RENV_COMPLETION_FILE";

const BLOCK_START: &str = "# >>> renv completions >>>";
const BLOCK_END: &str = "# <<< renv completions <<<";

/// Inline blocks written by older installers
const LEGACY_BLOCKS: [(&str, &str); 1] = [("# renv completion", "# end renv completion")];
const LEGACY_LINES: [&str; 1] = ["complete -F _renv_completion renv"];

/// Bash completion script for `renv`
pub const BASH_SCRIPT: &str = r#"# bash completion for renv
_renv_completion() {
    local cur prev
    cur="${COMP_WORDS[COMP_CWORD]}"
    prev="${COMP_WORDS[COMP_CWORD-1]}"

    case "$prev" in
        --runtime)
            COMPREPLY=( $(compgen -W "docker podman" -- "$cur") )
            return 0
            ;;
        --log-format)
            COMPREPLY=( $(compgen -W "text json" -- "$cur") )
            return 0
            ;;
        --log-level)
            COMPREPLY=( $(compgen -W "error warn info debug trace" -- "$cur") )
            return 0
            ;;
    esac

    if [[ "$cur" == -* ]]; then
        COMPREPLY=( $(compgen -W "--force --nocache --no-container --install --list --destroy --prune --ext --blacklist --image --runtime --log-format --log-level --help --version" -- "$cur") )
        return 0
    fi

    if [[ "$cur" == *@* ]]; then
        local repo="${cur%%@*}"
        local branches
        branches=$(renv --complete-branches "$repo" 2>/dev/null)
        COMPREPLY=( $(compgen -P "${repo}@" -W "$branches" -- "${cur#*@}") )
        return 0
    fi

    COMPREPLY=( $(compgen -W "$(renv --complete-repos 2>/dev/null)" -- "$cur") )
}
complete -o nospace -F _renv_completion renv
"#;

/// Where the completion script is written: `RENV_COMPLETION_FILE`, else
/// `~/.config/renv/completions.sh`
pub fn completion_file_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(COMPLETION_FILE_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    home_dir().map(|home| home.join(".config").join("renv").join("completions.sh"))
}

/// Default rc file: `~/.bashrc`
pub fn default_rc_path() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".bashrc"))
}

fn home_dir() -> Result<PathBuf> {
    directories_next::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| {
            ConfigError::Validation {
                message: "Cannot determine home directory".to_string(),
            }
            .into()
        })
}

/// Remove managed and legacy completion blocks, collapsing blank runs
pub fn strip_completion_blocks(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut skip_until: Option<&str> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(end) = skip_until {
            if trimmed == end {
                skip_until = None;
            }
            continue;
        }
        if trimmed == BLOCK_START {
            skip_until = Some(BLOCK_END);
            continue;
        }
        if let Some((_, end)) = LEGACY_BLOCKS.iter().find(|(start, _)| *start == trimmed) {
            skip_until = Some(end);
            continue;
        }
        if LEGACY_LINES.contains(&trimmed) {
            continue;
        }
        kept.push(line);
    }

    let mut collapsed: Vec<&str> = Vec::new();
    for line in kept {
        let blank = line.trim().is_empty();
        if blank && collapsed.last().map_or(true, |prev| prev.trim().is_empty()) {
            continue;
        }
        collapsed.push(line);
    }
    while collapsed.last().is_some_and(|l| l.trim().is_empty()) {
        collapsed.pop();
    }
    collapsed.join("\n")
}

/// The managed block sourcing `completion_path`
pub fn source_block(completion_path: &Path) -> String {
    let escaped = completion_path.display().to_string().replace('"', "\\\"");
    format!("{}\nsource \"{}\"\n{}", BLOCK_START, escaped, BLOCK_END)
}

/// Write the script to `completion_path` and (re)install the source block in `rc_path`
pub fn install(completion_path: &Path, rc_path: &Path) -> Result<()> {
    if let Some(parent) = completion_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RenvError::io(parent, e))?;
    }
    std::fs::write(completion_path, BASH_SCRIPT).map_err(|e| RenvError::io(completion_path, e))?;
    info!("Wrote completion script to {}", completion_path.display());

    if let Some(parent) = rc_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RenvError::io(parent, e))?;
    }
    let existing = if rc_path.exists() {
        std::fs::read_to_string(rc_path).map_err(|e| RenvError::io(rc_path, e))?
    } else {
        String::new()
    };

    let stripped = strip_completion_blocks(&existing);
    let block = source_block(completion_path);
    let content = if stripped.trim().is_empty() {
        format!("{}\n", block)
    } else {
        format!("{}\n\n{}\n", stripped, block)
    };
    std::fs::write(rc_path, content).map_err(|e| RenvError::io(rc_path, e))?;
    info!("Added completion source block to {}", rc_path.display());
    Ok(())
}
