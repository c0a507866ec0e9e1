//! `mvault dedupe ...` – hash-group scan and keep-selection execution.

use anyhow::Result;
use clap::Subcommand;
use mvault_core::config::VaultConfig;
use mvault_core::error::Side;
use mvault_core::hasher::HashMode;
use std::collections::HashMap;

use crate::server::state::AppState;

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str(s).ok_or_else(|| anyhow::anyhow!("side must be 'local' or 'lake', got {s:?}"))
}

fn parse_mode(s: &str) -> anyhow::Result<HashMode> {
    match s {
        "full" => Ok(HashMode::Full),
        "fast" => Ok(HashMode::Fast),
        other => anyhow::bail!("mode must be 'full' or 'fast', got {other:?}"),
    }
}

#[derive(Debug, Subcommand)]
pub enum DedupeCommand {
    /// Scan one side for duplicate-hash groups.
    Scan {
        side: String,
        #[arg(long, default_value = "full")]
        mode: String,
        #[arg(long, default_value = "0")]
        min_size: i64,
    },
    /// Show the groups found by a previous scan.
    Results { scan_id: String },
    /// Execute a scan's keep-selections, deleting the rest.
    Execute {
        side: String,
        scan_id: String,
        /// Repeatable `group_id=relpath` keep-selections.
        #[arg(long = "keep", value_parser = parse_selection)]
        selections: Vec<(i64, String)>,
    },
}

fn parse_selection(s: &str) -> Result<(i64, String), String> {
    let (group, relpath) = s.split_once('=').ok_or_else(|| "expected group_id=relpath".to_string())?;
    let group_id: i64 = group.parse().map_err(|_| "group_id must be an integer".to_string())?;
    Ok((group_id, relpath.to_string()))
}

pub async fn run_dedupe(cfg: VaultConfig, command: DedupeCommand) -> Result<()> {
    let state = AppState::build(cfg).await?;

    match command {
        DedupeCommand::Scan { side, mode, min_size } => {
            let side = parse_side(&side)?;
            let root = state.roots.of(side);
            let summary = state.dedupe.scan(side, root, parse_mode(&mode)?, min_size).await?;
            println!(
                "scan_id={} groups={} reclaimable_bytes={}",
                summary.scan_id, summary.groups, summary.reclaimable_bytes
            );
        }
        DedupeCommand::Results { scan_id } => {
            for group in state.dedupe.results(&scan_id).await? {
                println!("group {} hash={}", group.group_id, group.hash);
                for file in group.files {
                    println!("  {}\t{}\t{}", file.relpath, file.size, if file.keep { "keep" } else { "" });
                }
            }
        }
        DedupeCommand::Execute { side, scan_id, selections } => {
            let side = parse_side(&side)?;
            let root = state.roots.of(side);
            let selections: HashMap<i64, String> = selections.into_iter().collect();
            let result = state.dedupe.execute(side, root, &scan_id, &selections).await?;
            println!("deleted={} freed_bytes={} errors={:?}", result.deleted, result.freed_bytes, result.errors);
        }
    }

    Ok(())
}
