//! `mvault remote ...` – session lifecycle and task inspection for the
//! remote provisioning broker. Since the broker's state is
//! purely in-memory, these commands only make sense against a running
//! `mvault serve` process in practice; here they operate on a fresh
//! in-process broker, useful for smoke-testing the coalescing/long-poll
//! logic without the HTTP layer.

use anyhow::Result;
use clap::Subcommand;
use mvault_core::config::VaultConfig;

use crate::server::state::AppState;

#[derive(Debug, Subcommand)]
pub enum RemoteCommand {
    /// Start a fresh remote session, printing the bearer key.
    Enable,
    /// End the active session.
    End,
    /// Show whether a session is active.
    Status,
    /// Enqueue a remote task by type and JSON payload.
    Enqueue { task_type: String, payload: String },
    /// List all tasks in the active session.
    Tasks,
    /// Cancel a task by id.
    Cancel { task_id: String },
}

pub async fn run_remote(cfg: VaultConfig, command: RemoteCommand) -> Result<()> {
    let state = AppState::build(cfg).await?;

    match command {
        RemoteCommand::Enable => {
            let key = state.remote.enable_session().await;
            println!("session enabled, bearer={key}");
        }
        RemoteCommand::End => {
            state.remote.end_session().await;
            println!("session ended");
        }
        RemoteCommand::Status => {
            let status = state.remote.status().await;
            println!("active={} expires_at={:?}", status.active, status.expires_at);
        }
        RemoteCommand::Enqueue { task_type, payload } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let task = state.remote.enqueue_task(&task_type, payload).await?;
            println!("enqueued task {}", task.id);
        }
        RemoteCommand::Tasks => {
            for task in state.remote.list_tasks().await {
                println!("{}\t{}\t{}\t{:.2}", task.id, task.task_type, task.status, task.progress);
            }
        }
        RemoteCommand::Cancel { task_id } => {
            state.remote.cancel_task(&task_id).await?;
            println!("cancelled task {task_id}");
        }
    }

    Ok(())
}
