//! CLI command handlers, one file per subcommand group.

mod dedupe;
mod download;
mod index;
mod queue;
mod remote;
mod serve;

pub use dedupe::{run_dedupe, DedupeCommand};
pub use download::{run_download, DownloadCommand};
pub use index::{run_index, IndexCommand};
pub use queue::{run_queue, QueueCommand};
pub use remote::{run_remote, RemoteCommand};
pub use serve::run_serve;
