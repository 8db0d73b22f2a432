//! Command implementations
//!
//! `launch` is the main pipeline; `manage` covers listing and removing
//! environments plus the completion helpers; `install` sets up shell completion.

pub mod install;
pub mod launch;
pub mod manage;
