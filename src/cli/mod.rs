// ABOUTME: CLI argument parsing and command routing for roomshell
//
// Provides command-line interface for:
// - Serving one connection over stdin/stdout (serve-stdio)
// - Previewing the run command for a file (resolve)
// - Removing every room container (sweep)
// - Checking the container runtime (check)

pub mod check;
pub mod resolve;
pub mod serve;
pub mod sweep;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sandboxed per-room terminal sessions for collaborative coding
#[derive(Parser)]
#[command(name = "roomshell")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file applied on top of the standard locations
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write human-readable logs to stderr instead of the JSON log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve one connection speaking JSON-lines events on stdin/stdout
    ServeStdio,

    /// Print the run command for a file in a room
    Resolve(ResolveArgs),

    /// Force-remove every room container
    Sweep,

    /// Report container runtime reachability and image presence
    Check,
}

/// Arguments for the resolve command
#[derive(clap::Args)]
pub struct ResolveArgs {
    /// File name, used to pick the language
    pub name: String,

    /// File path; must contain the room id as a path segment
    pub path: String,

    /// Room id
    #[arg(long)]
    pub room: String,
}
