//! CLI for the MDM batch download manager.

mod commands;
mod control_socket;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use mdm_core::config;

use commands::{run_batch, run_cancel, run_completions, run_man, run_pause, run_resume};

/// Top-level CLI for the MDM download manager.
#[derive(Debug, Parser)]
#[command(name = "mdm")]
#[command(about = "MDM: concurrent batch download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a batch of files and wait until every one has finished.
    Run(RunArgs),

    /// Pause a task of the running batch by name.
    Pause {
        /// Task name.
        name: String,
    },

    /// Resume a paused task of the running batch.
    Resume {
        /// Task name.
        name: String,
    },

    /// Cancel a task of the running batch.
    Cancel {
        /// Task name.
        name: String,
    },

    /// Print a shell completion script to stdout.
    Completions {
        /// Target shell.
        shell: Shell,
    },

    /// Print the man page (roff) to stdout.
    Man,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Downloads as `URL` or `NAME=URL`. Without a name, the last path segment is used.
    #[arg(value_name = "REQUEST")]
    pub requests: Vec<String>,

    /// TOML batch file with `[[download]]` entries (`url`, optional `name`).
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Maximum downloads transmitting at once (overrides `max_parallel`).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub jobs: Option<u32>,

    /// Directory completed downloads are moved into.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Replace existing files instead of failing the task.
    #[arg(long)]
    pub overwrite: bool,

    /// Fabricate payloads locally instead of using the network.
    #[arg(long)]
    pub simulate: bool,

    /// With `--simulate`, randomize per-chunk delays.
    #[arg(long, requires = "simulate")]
    pub randomize: bool,

    /// Print one JSON object per event instead of human-readable lines.
    #[arg(long)]
    pub json: bool,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<ExitCode> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Completions { shell } => run_completions(shell)?,
            CliCommand::Man => run_man()?,
            CliCommand::Pause { name } => run_pause(&name).await?,
            CliCommand::Resume { name } => run_resume(&name).await?,
            CliCommand::Cancel { name } => run_cancel(&name).await?,
            CliCommand::Run(args) => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                if !run_batch(cfg, args).await? {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests;
