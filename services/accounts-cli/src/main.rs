//! Antigravity account pool CLI
//!
//! Single-binary host for the account pool that:
//! 1. Loads configuration and the bootstrap credential
//! 2. Builds the pool from the accounts file
//! 3. Runs one command against it and saves the result
//! 4. Prints the command's JSON result to stdout (logs go to stderr)

mod cli;
mod commands;
mod config;
mod error;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Command;
use crate::commands::Runner;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let invocation = match cli::parse(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("error: {e}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    if invocation.command == Command::Help {
        print!("{}", cli::USAGE);
        return Ok(());
    }

    let config = match Config::resolve_path(invocation.config_path.as_deref()) {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Config::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => Config::load_default().context("failed to load default configuration")?,
    };

    let storage = config
        .storage
        .open()
        .context("failed to resolve accounts file location")?;

    let bootstrap = match &config.bootstrap.credential_file {
        Some(path) => antigravity_auth::load_credential(path)
            .await
            .with_context(|| format!("failed to load bootstrap credential from {}", path.display()))?,
        None => None,
    };

    info!(
        command = invocation.command.name(),
        accounts_path = %storage.path().display(),
        bootstrap = bootstrap.is_some(),
        "configuration loaded"
    );

    let runner = Runner::new(storage, bootstrap, config.rotation);
    let output = runner
        .run(&invocation.command)
        .await
        .with_context(|| format!("{} failed", invocation.command.name()))?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
