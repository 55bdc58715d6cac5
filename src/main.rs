use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use nyx::boot::{self, BootManifest, BootScript};

/// Nyx OS boot entry: greets, then runs boot scripts in the embedded runtime.
#[derive(Parser, Debug)]
#[command(name = "nyx", version, about)]
struct Args {
    /// YAML boot manifest (also: NYX_MANIFEST env var)
    #[arg(short, long, env = "NYX_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Extra source string to run after the manifest's scripts; repeatable
    #[arg(short = 'c', long = "command", value_name = "CODE")]
    commands: Vec<String>,

    /// Skip the greeting line
    #[arg(long)]
    no_greeting: bool,

    /// Log filter directive, e.g. `debug` or `nyx=trace` (also: NYX_LOG env var)
    #[arg(long, env = "NYX_LOG", default_value = "warn")]
    log_level: String,

    /// Script files to run after everything else
    scripts: Vec<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .with_writer(io::stderr)
        .init();

    let mut manifest = match &args.manifest {
        Some(path) => BootManifest::load(path)?,
        None => BootManifest::default(),
    };
    if args.no_greeting {
        manifest.greeting = None;
    }
    for (index, command) in args.commands.iter().enumerate() {
        manifest
            .scripts
            .push(BootScript::inline(format!("-c #{}", index + 1), command.as_str()));
    }
    manifest
        .scripts
        .extend(args.scripts.iter().cloned().map(BootScript::file));
    debug!(?manifest, "boot manifest resolved");

    // Script failures are reported on stderr by the boot sequence's log events.
    let report = boot::boot(&manifest, io::stdout().lock())?;

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
