//! `--install`: bash completion setup

use anyhow::Result;
use renv_core::completion;
use tracing::instrument;

#[instrument]
pub fn execute_install() -> Result<()> {
    let script = completion::completion_file_path()?;
    let rc = completion::default_rc_path()?;
    completion::install(&script, &rc)?;
    println!("Installed bash completion to {}", script.display());
    println!(
        "Run 'source {}' or open a new terminal to enable it",
        rc.display()
    );
    Ok(())
}
