// ABOUTME: CLI resolve command - print the command a run-file request would execute

use super::{OutputFormat, ResolveArgs};
use anyhow::Result;
use roomshell::dispatch::Language;
use roomshell::events::FileRef;
use roomshell::resolve_command;
use serde::Serialize;

/// JSON output structure for resolve command
#[derive(Debug, Serialize)]
pub struct ResolveOutput {
    pub language: String,
    pub command: Option<String>,
}

pub fn execute(args: ResolveArgs, format: OutputFormat) -> Result<()> {
    let file = FileRef {
        name: args.name,
        path: args.path,
    };
    let output = ResolveOutput {
        language: Language::from_file_name(&file.name).to_string(),
        command: resolve_command(&file, &args.room),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => match &output.command {
            Some(command) => println!("{command}"),
            None => println!("unsupported"),
        },
    }

    Ok(())
}
