//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Live preview server: keeps a browser in step with the files you edit
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: livedev.toml)
    #[arg(short = 'C', long, global = true, default_value = "livedev.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve a project and keep the browser preview in sync
    #[command(visible_alias = "s")]
    Serve {
        #[command(flatten)]
        args: ServeArgs,
    },
}

/// Arguments of the `serve` command
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Project root (default: directory of the config file, or cwd)
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// File to preview first (relative to the project root)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Pin the preview to `--file`, ignoring later file switches
    #[arg(long, requires = "file")]
    pub pin: bool,

    /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
    #[arg(short, long)]
    pub interface: Option<std::net::IpAddr>,

    /// HTTP port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// WebSocket port the preview page connects back to
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Enable file watching
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub watch: Option<bool>,
}

impl Cli {
    pub fn serve_args(&self) -> &ServeArgs {
        match &self.command {
            Commands::Serve { args } => args,
        }
    }
}
