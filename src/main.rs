// ABOUTME: Main entry point for roomshell
//
// Binary: roomshell
// Usage: roomshell <COMMAND>
// - serve-stdio: serve one connection over stdin/stdout
// - resolve: print the run command for a file
// - sweep: remove all room containers
// - check: report runtime status

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;
use roomshell::AppConfig;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    setup_logging(args.log_stderr);
    setup_panic_handler();

    let config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        cli::Commands::ServeStdio => cli::serve::execute(config).await,
        cli::Commands::Resolve(resolve_args) => cli::resolve::execute(resolve_args, args.format),
        cli::Commands::Sweep => cli::sweep::execute(&config).await,
        cli::Commands::Check => cli::check::execute(&config, args.format).await,
    }
}

fn setup_logging(to_stderr: bool) {
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "roomshell=info".into());

    if to_stderr {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
        return;
    }

    // Create log directory if it doesn't exist
    let log_dir = dirs::home_dir()
        .map(|home| home.join(".roomshell").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".roomshell/logs"));

    let _ = std::fs::create_dir_all(&log_dir);

    // Create JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "roomshell-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    let file = match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => file,
        Err(e) => {
            // stdout is the event channel in serve-stdio, so fall back to stderr
            eprintln!("Failed to create log file {}: {}", log_file.display(), e);
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
            return;
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()             // Output in JSON Lines format
                .with_target(true)  // Include target module in JSON
                .with_writer(file)
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
