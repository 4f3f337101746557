//! vcopy - Command-line interface for the verified-copy engine.
//!
//! Every subcommand is turned into a dispatch [`Action`]; `shell` runs the
//! same dispatcher behind an interactive prompt.
//!
//! Exit codes: 0 on success or PASS, 1 when verification failed, 2 on a
//! fatal error.

mod dispatch;
mod logger;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dispatch::{dispatch, Action, Shell, EXIT_ERROR};
use engine::{PipelineConfig, ProgressCallback, TransferRequest};
use progress::CliProgress;
use std::io;
use std::path::PathBuf;

/// vcopy - Copy a folder and prove the copy with SHA-256 ledgers
#[derive(Parser, Debug)]
#[command(name = "vcopy")]
#[command(version)]
#[command(about = "Verified bulk copy with checksum ledgers and a JSON manifest")]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (overrides the config file)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print every file as it is processed
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hash the source, copy it, hash the copy, compare and write a manifest
    Copy {
        /// Source top folder
        #[arg(long, value_name = "PATH")]
        src: PathBuf,

        /// Destination parent; the top folder is created inside it
        #[arg(long, value_name = "PATH")]
        dst: PathBuf,

        /// Operator recorded in ledgers and the manifest
        #[arg(long, value_name = "NAME")]
        technician: String,

        /// Allow copying into an existing destination folder
        #[arg(long)]
        overwrite: bool,
    },

    /// Write a checksum ledger for a folder
    Hash {
        #[arg(value_name = "PATH")]
        root: PathBuf,

        #[arg(long, value_name = "NAME")]
        technician: String,
    },

    /// Check a folder against an existing ledger
    Verify {
        /// Ledger written by an earlier run
        #[arg(long, value_name = "FILE")]
        ledger: PathBuf,

        /// Folder to check
        #[arg(value_name = "PATH")]
        root: PathBuf,

        #[arg(long, value_name = "NAME")]
        technician: String,
    },

    /// Re-check the ledgers referenced by a manifest
    Audit {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },

    /// Move a file or folder into another folder (copy and remove across devices)
    Relocate {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        #[arg(value_name = "DEST_DIR")]
        dest_dir: PathBuf,
    },

    /// Interactive menu over the same commands
    Shell,
}

impl Command {
    /// The dispatch action for a one-shot command; `None` for `shell`.
    fn to_action(&self) -> Option<Action> {
        Some(match self {
            Command::Copy {
                src,
                dst,
                technician,
                overwrite,
            } => Action::Copy {
                request: TransferRequest {
                    source: src.clone(),
                    destination_parent: dst.clone(),
                    allow_overwrite: *overwrite,
                },
                technician: technician.clone(),
            },
            Command::Hash { root, technician } => Action::Hash {
                root: root.clone(),
                technician: technician.clone(),
            },
            Command::Verify {
                ledger,
                root,
                technician,
            } => Action::Verify {
                ledger: ledger.clone(),
                root: root.clone(),
                technician: technician.clone(),
            },
            Command::Audit { manifest } => Action::Audit {
                manifest: manifest.clone(),
            },
            Command::Relocate { path, dest_dir } => Action::Relocate {
                path: path.clone(),
                dest_dir: dest_dir.clone(),
            },
            Command::Shell => return None,
        })
    }
}

fn load_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Parse arguments, set up logging, then run the command
fn main() {
    let args = Args::parse();

    let exit_code = match run_cli(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> anyhow::Result<i32> {
    let config = load_config(args)?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logger::init(level)?;

    let progress = CliProgress::new(args.verbose);
    run_command(&args.command, &config, &progress)
}

fn run_command(
    command: &Command,
    config: &PipelineConfig,
    progress: &dyn ProgressCallback,
) -> anyhow::Result<i32> {
    let Some(action) = command.to_action() else {
        let stdin = io::stdin();
        let mut shell = Shell::new(stdin.lock(), io::stdout(), config, progress);
        return Ok(shell.run()?);
    };

    let outcome = dispatch(&action, config, progress)?;
    outcome.write_summary(&mut io::stdout())?;
    Ok(outcome.exit_code())
}
