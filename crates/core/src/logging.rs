//! Logging setup
//!
//! Structured logging through `tracing-subscriber`, text or JSON, always on
//! stderr so stdout stays free for the attached command and for `--list`
//! style output.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter override
pub const LOG_ENV: &str = "RENV_LOG";
/// Log format override (`json` or `text`)
pub const LOG_FORMAT_ENV: &str = "RENV_LOG_FORMAT";

static INIT: Once = Once::new();

/// Initialize logging once; later calls are no-ops.
///
/// * `format` - `"json"` for JSON lines, anything else for text. Falls back to
///   `RENV_LOG_FORMAT` when `None`.
/// * `filter` - explicit filter directive (from `--log-level`). Otherwise
///   `RENV_LOG`, then `RUST_LOG`, then `default_level`.
///
/// ```rust
/// use renv_core::logging;
///
/// logging::init(None, None, "info").expect("Failed to initialize logging");
/// ```
pub fn init(format: Option<&str>, filter: Option<&str>, default_level: &str) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(filter, default_level);

        let env_format = std::env::var(LOG_FORMAT_ENV).ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(false).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Filter directive for a `--log-level` value, covering the CLI and library
pub fn level_directive(level: &str) -> String {
    format!("renv={level},renv_core={level}")
}

fn create_env_filter(explicit: Option<&str>, default_level: &str) -> EnvFilter {
    if let Some(spec) = explicit {
        return EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new(default_level));
    }
    if let Ok(renv_log) = std::env::var(LOG_ENV) {
        EnvFilter::try_new(&renv_log).unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid {} filter '{}', using default '{}'",
                LOG_ENV,
                renv_log,
                default_level
            );
            EnvFilter::new(default_level)
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
