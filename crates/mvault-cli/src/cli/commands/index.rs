//! `mvault index ...` – scan, list, diff, and stat the two sides directly
//! against the store, without going through the HTTP layer.

use anyhow::Result;
use clap::Subcommand;
use mvault_core::config::VaultConfig;
use mvault_core::error::Side;

use crate::server::state::AppState;

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// Rescan one or both sides.
    Refresh {
        #[arg(value_enum)]
        side: SideArg,
    },
    /// List indexed files under a folder.
    Files {
        #[arg(value_enum)]
        side: SideArg,
        #[arg(long, default_value = "")]
        folder: String,
        #[arg(long, default_value = "")]
        query: String,
    },
    /// List immediate subfolders.
    Folders {
        #[arg(value_enum)]
        side: SideArg,
        #[arg(long, default_value = "")]
        parent: String,
    },
    /// Show the Local/Lake diff for a folder.
    Diff {
        #[arg(long, default_value = "")]
        folder: String,
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Per-side counts, bytes, and hashed count.
    Stats,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SideArg {
    Local,
    Lake,
    Both,
}

fn sides_for(arg: SideArg) -> Vec<Side> {
    match arg {
        SideArg::Local => vec![Side::Local],
        SideArg::Lake => vec![Side::Lake],
        SideArg::Both => vec![Side::Local, Side::Lake],
    }
}

pub async fn run_index(cfg: VaultConfig, command: IndexCommand) -> Result<()> {
    let state = AppState::build(cfg).await?;

    match command {
        IndexCommand::Refresh { side } => {
            for side in sides_for(side) {
                let root = state.roots.of(side);
                let count = state.indexer.scan_side(side, &root).await?;
                println!("{side}: indexed {count} files");
            }
        }
        IndexCommand::Files { side, folder, query } => {
            for side in sides_for(side) {
                let files = state.indexer.get_files(side, &folder, &query).await?;
                for f in files {
                    println!(
                        "{side}\t{}\t{}\t{}",
                        f.relpath,
                        f.size,
                        f.hash.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        IndexCommand::Folders { side, parent } => {
            for side in sides_for(side) {
                for folder in state.indexer.get_folders(side, &parent).await? {
                    println!("{side}\t{folder}");
                }
            }
        }
        IndexCommand::Diff { folder, query } => {
            for entry in state.differ.compute_diff(&folder, &query).await? {
                println!("{:?}\t{}", entry.status, entry.relpath);
            }
        }
        IndexCommand::Stats => {
            for side in [Side::Local, Side::Lake] {
                let stats = state.indexer.get_stats(side).await?;
                println!(
                    "{side}: files={} bytes={} hashed={}",
                    stats.file_count, stats.total_bytes, stats.hashed_count
                );
            }
        }
    }

    Ok(())
}
