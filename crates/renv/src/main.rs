use clap::Parser;
use renv_core::errors::{ParseError, RenvError};

mod cli;
mod commands;
mod ui;

/// Stable exit code for a setup failure
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<RenvError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<ParseError>() {
        return RenvError::Parse(e.clone()).exit_code();
    }
    1
}

#[tokio::main]
async fn main() {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = exit_code(&err);
            eprintln!("Error: {:#}", err);
            std::process::exit(code);
        }
    }
}
