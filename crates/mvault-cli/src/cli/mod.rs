//! CLI for the model vault engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mvault_core::config;

use commands::{
    run_dedupe, run_download, run_index, run_queue, run_remote, run_serve, DedupeCommand,
    DownloadCommand, IndexCommand, QueueCommand, RemoteCommand,
};

/// Top-level CLI for the model vault engine.
#[derive(Debug, Parser)]
#[command(name = "mvault")]
#[command(about = "Model Vault: two-sided model-file library manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the HTTP/WebSocket server, the worker loop, and the downloader scheduler.
    Serve {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Index operations: refresh, list files/folders, diff, stats.
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },

    /// Queue operations: enqueue copy/move/delete/verify, list, pause/resume, mirror.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Dedupe operations: scan, show results, execute.
    Dedupe {
        #[command(subcommand)]
        command: DedupeCommand,
    },

    /// Downloader operations: enqueue, list, cancel.
    Download {
        #[command(subcommand)]
        command: DownloadCommand,
    },

    /// Remote broker operations: session lifecycle, task inspection.
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Serve { host, port } => run_serve(cfg, host, port).await?,
            CliCommand::Index { command } => run_index(cfg, command).await?,
            CliCommand::Queue { command } => run_queue(cfg, command).await?,
            CliCommand::Dedupe { command } => run_dedupe(cfg, command).await?,
            CliCommand::Download { command } => run_download(cfg, command).await?,
            CliCommand::Remote { command } => run_remote(cfg, command).await?,
        }

        Ok(())
    }
}
