//! livedev - live preview server.

use anyhow::Result;
use clap::{ColorChoice, Parser};
use livedev::{
    cli::{Cli, Commands},
    config::LiveConfig,
    core, logger,
};

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = LiveConfig::load(&cli)?;

    match &cli.command {
        Commands::Serve { args } => livedev::cli::serve::serve(config, args),
    }
}
