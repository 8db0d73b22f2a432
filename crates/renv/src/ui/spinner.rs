use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use renv_core::progress::{ProgressEmitter, ProgressEvent};
use std::time::Duration;

fn default_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A spinner that maps the ProgressEvent stream to friendly messages on stderr.
#[derive(Debug)]
pub struct SpinnerEmitter {
    pb: ProgressBar,
}

impl SpinnerEmitter {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(80));
        pb.set_style(default_style());
        Self { pb }
    }

    fn set_msg(&self, msg: impl Into<String>) {
        self.pb.set_message(msg.into());
    }

    /// Print a finished line above the spinner and keep spinning
    fn println(&self, msg: impl AsRef<str>) {
        self.pb.println(msg.as_ref());
    }

    fn finish_with(&self, msg: impl Into<String>) {
        self.pb.set_style(plain_style());
        self.pb.finish_with_message(msg.into());
    }
}

impl Drop for SpinnerEmitter {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

impl Default for SpinnerEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressEmitter for SpinnerEmitter {
    fn emit(&mut self, event: &ProgressEvent) -> Result<()> {
        use ProgressEvent::*;
        match event {
            WorkspacePrepareBegin { spec, .. } => {
                self.set_msg(style(format!("Preparing workspace for {}…", spec)).yellow().to_string());
            }
            WorkspacePrepareEnd {
                success,
                duration_ms,
                ..
            } => {
                if *success {
                    self.println(style(format!("Workspace ready in {} ms", duration_ms)).green().to_string());
                } else {
                    self.finish_with(style("Workspace preparation failed").red().to_string());
                }
            }
            ContainerCreateBegin { name, image, .. } => {
                self.set_msg(
                    style(format!("Building container '{}' from {}…", name, image))
                        .yellow()
                        .to_string(),
                );
            }
            ContainerCreateEnd {
                success,
                duration_ms,
                ..
            } => {
                if *success {
                    self.finish_with(style(format!("Container ready in {} ms", duration_ms)).green().to_string());
                } else {
                    self.finish_with(style("Container creation failed").red().to_string());
                }
            }
            ContainerReuse { name, .. } => {
                self.finish_with(style(format!("Attaching to running container '{}'", name)).green().to_string());
            }
            ContainerStart { name, .. } => {
                self.set_msg(style(format!("Starting container '{}'…", name)).yellow().to_string());
            }
            ContainerRemove { name, reason, .. } => {
                self.println(style(format!("Removed container '{}' ({})", name, reason)).dim().to_string());
            }
            ContainerRecover { name, .. } => {
                self.println(
                    style(format!("Workspace of '{}' is gone; recreating environment", name))
                        .yellow()
                        .to_string(),
                );
            }
        }
        Ok(())
    }
}
