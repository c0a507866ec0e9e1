//! `mvault download ...` – enqueue and inspect download jobs; actual
//! transfer happens in the downloader scheduler (`mvault serve`).

use anyhow::Result;
use clap::Subcommand;
use mvault_core::config::VaultConfig;
use std::path::PathBuf;

use crate::server::state::AppState;

#[derive(Debug, Subcommand)]
pub enum DownloadCommand {
    /// Enqueue a new download job.
    Add {
        url: String,
        /// Override the destination filename (else derived from the URL or
        /// the server's Content-Disposition header).
        #[arg(long)]
        filename: Option<String>,
        /// Directory the file lands in; defaults to the local root.
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Skip registering a source/file-index entry on completion.
        #[arg(long)]
        no_record_source: bool,
    },
    /// List all download jobs.
    List,
    /// Cancel one job by id.
    Cancel { id: i64 },
    /// Cancel every non-terminal job.
    CancelAll,
}

pub async fn run_download(cfg: VaultConfig, command: DownloadCommand) -> Result<()> {
    let state = AppState::build(cfg).await?;

    match command {
        DownloadCommand::Add { url, filename, dest, no_record_source } => {
            let target_root = dest.unwrap_or_else(|| state.config.local_models_root.clone());
            let id = state
                .downloader
                .enqueue(&url, filename.as_deref(), &target_root, !no_record_source)
                .await?;
            println!("enqueued download job {id}");
        }
        DownloadCommand::List => {
            for job in state.downloader.list().await? {
                println!(
                    "{}\t{:?}\t{}\t{}/{}",
                    job.id,
                    job.status,
                    job.url,
                    job.bytes_downloaded,
                    job.total_bytes.map(|b| b.to_string()).unwrap_or_else(|| "?".to_string())
                );
            }
        }
        DownloadCommand::Cancel { id } => {
            state.downloader.cancel(id).await?;
            println!("cancelled job {id}");
        }
        DownloadCommand::CancelAll => {
            state.downloader.cancel_all().await?;
            println!("cancelled all jobs");
        }
    }

    Ok(())
}
