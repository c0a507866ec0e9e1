//! `mvault queue ...` – enqueue and inspect queue tasks directly against
//! the store; actual execution happens in the worker loop (`mvault serve`).

use anyhow::Result;
use clap::Subcommand;
use mvault_core::config::VaultConfig;
use mvault_core::error::Side;
use mvault_core::queue::MirrorPlanner;

use crate::server::state::AppState;

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str(s).ok_or_else(|| anyhow::anyhow!("side must be 'local' or 'lake', got {s:?}"))
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Enqueue a copy from one side to the other.
    Copy {
        src_side: String,
        src_relpath: String,
        dst_side: String,
        dst_relpath: String,
    },
    /// Enqueue a move, replicated across the given sides.
    Move {
        #[arg(long, value_delimiter = ',')]
        sides: Vec<String>,
        src_relpath: String,
        dst_relpath: String,
    },
    /// Enqueue a delete.
    Delete {
        side: String,
        relpath: String,
        #[arg(long)]
        force: bool,
    },
    /// Enqueue a verify of a folder.
    Verify { folder: String },
    /// List all queue tasks.
    List,
    /// Pause the worker.
    Pause,
    /// Resume the worker.
    Resume,
    /// Cancel a task by id.
    Cancel { id: i64 },
    /// Remove a pending task by id.
    Remove { id: i64 },
    /// Compute a mirror plan between two folders without enqueueing.
    MirrorPlan {
        src_side: String,
        src_folder: String,
        dst_side: String,
        dst_folder: String,
    },
    /// Compute and enact a mirror plan between two folders.
    MirrorExecute {
        src_side: String,
        src_folder: String,
        dst_side: String,
        dst_folder: String,
        #[arg(long)]
        allow_delete_on_dst: bool,
    },
}

pub async fn run_queue(cfg: VaultConfig, command: QueueCommand) -> Result<()> {
    let state = AppState::build(cfg).await?;

    match command {
        QueueCommand::Copy { src_side, src_relpath, dst_side, dst_relpath } => {
            let id = state
                .queue
                .enqueue_copy(parse_side(&src_side)?, &src_relpath, parse_side(&dst_side)?, &dst_relpath)
                .await?;
            println!("enqueued copy task {id}");
        }
        QueueCommand::Move { sides, src_relpath, dst_relpath } => {
            let sides: Vec<Side> = sides.iter().map(|s| parse_side(s)).collect::<Result<_>>()?;
            let ids = state.queue.enqueue_move(&sides, &src_relpath, &dst_relpath).await?;
            println!("enqueued move tasks {ids:?}");
        }
        QueueCommand::Delete { side, relpath, force } => {
            let side = parse_side(&side)?;
            let allow_delete = match side {
                Side::Local => state.config.local_allow_delete,
                Side::Lake => state.config.lake_allow_delete,
            };
            if !force && !allow_delete {
                anyhow::bail!("delete denied by policy for side {side}; pass --force to bypass at your own risk");
            }
            let id = state.queue.enqueue_delete(side, &relpath, !force, allow_delete).await?;
            println!("enqueued delete task {id}");
        }
        QueueCommand::Verify { folder } => {
            let id = state.queue.enqueue_verify(&folder).await?;
            println!("enqueued verify task {id}");
        }
        QueueCommand::List => {
            for task in state.queue.list().await? {
                println!(
                    "{}\t{:?}\t{:?}\t{}",
                    task.id,
                    task.task_type,
                    task.status,
                    task.error_message.as_deref().unwrap_or("")
                );
            }
        }
        QueueCommand::Pause => {
            state.queue.pause();
            println!("queue paused");
        }
        QueueCommand::Resume => {
            state.queue.resume();
            println!("queue resumed");
        }
        QueueCommand::Cancel { id } => {
            let ok = state.queue.cancel(id).await?;
            println!("{}", if ok { "cancelled" } else { "not found or already terminal" });
        }
        QueueCommand::Remove { id } => {
            let ok = state.queue.remove(id).await?;
            println!("{}", if ok { "removed" } else { "not found or not pending" });
        }
        QueueCommand::MirrorPlan { src_side, src_folder, dst_side, dst_folder } => {
            let planner = MirrorPlanner::new(&state.differ, &state.queue);
            let plan = planner.plan(parse_side(&src_side)?, &src_folder, parse_side(&dst_side)?, &dst_folder).await?;
            println!(
                "copies={} deletes={} conflicts={}",
                plan.copies.len(),
                plan.deletes.len(),
                plan.conflicts.len()
            );
        }
        QueueCommand::MirrorExecute { src_side, src_folder, dst_side, dst_folder, allow_delete_on_dst } => {
            let planner = MirrorPlanner::new(&state.differ, &state.queue);
            let plan = planner
                .execute(parse_side(&src_side)?, &src_folder, parse_side(&dst_side)?, &dst_folder, allow_delete_on_dst)
                .await?;
            println!(
                "enacted: copies={} deletes={} conflicts(skipped)={}",
                plan.copies.len(),
                plan.deletes.len(),
                plan.conflicts.len()
            );
        }
    }

    Ok(())
}
