pub mod admission;
pub mod bundle;
pub mod config;
pub mod dedupe;
pub mod differ;
pub mod download;
pub mod error;
pub mod events;
pub mod hasher;
pub mod indexer;
pub mod logging;
pub mod queue;
pub mod range_stream;
pub mod remote;
pub mod resolver;
pub mod source;
pub mod store;
pub mod worker;

// Carried over from the teacher's segmented downloader and generalized to
// this crate's single-stream resumable jobs (see `download`).
pub mod retry;
pub mod url_model;
