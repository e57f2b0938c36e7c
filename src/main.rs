//! Inscript CLI
//!
//! Command-line interface for the inscript obfuscation pipeline.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use inscript::cli::{commands, Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries envelopes and advisor responses
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!("Inscript v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd, cli.settings.as_deref()),
        None => {
            println!("Inscript v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, settings_path: Option<&Path>) -> anyhow::Result<()> {
    match cmd {
        Commands::Encrypt {
            level,
            seed,
            input,
            output,
        } => {
            let settings = commands::load_settings(settings_path).context("loading settings")?;
            commands::encrypt(settings, level, seed, input.as_deref(), output.as_deref())
                .context("encrypt failed")
        }
        Commands::Decrypt {
            level,
            input,
            output,
        } => {
            let settings = commands::load_settings(settings_path).context("loading settings")?;
            commands::decrypt(settings, level, input.as_deref(), output.as_deref())
                .context("decrypt failed")
        }
        Commands::Verify { input } => commands::verify(input.as_deref()).context("verify failed"),
        Commands::Status => {
            let settings = commands::load_settings(settings_path).context("loading settings")?;
            commands::status(settings).context("status failed")
        }
        Commands::Advisor => commands::advisor().context("advisor request failed"),
    }
}
