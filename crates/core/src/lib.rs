//! Core library for renv
//!
//! This crate contains the repository spec parser, naming rules, cache and
//! workspace management, launch plan assembly, the container lifecycle state
//! machine, and the adapters for git, the container runtime and the rocker
//! build tool (each with an in-memory fake for tests).

pub mod attach;
pub mod build;
pub mod completion;
pub mod config;
pub mod container;
pub mod container_lifecycle;
pub mod docker;
pub mod errors;
pub mod git;
pub mod launch_plan;
pub mod logging;
pub mod naming;
pub mod progress;
pub mod repo_spec;
pub mod runtime;
pub mod workspace;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
