//! Error taxonomy for the vault engine.
//!
//! Queue tasks and downloader jobs catch everything at their own boundary
//! and store the message on the row (see `worker` and `downloader`); this
//! type exists so those boundaries, and the HTTP layer above them, can match
//! on *kind* rather than parsing strings.

use thiserror::Error;

/// A side of the two managed roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Lake,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Lake => "lake",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Side::Local),
            "lake" => Some(Side::Lake),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error taxonomy. `Config` and `StoreUnavailable` are
/// fatal at startup; the rest are caught and reported at the relevant
/// boundary (queue task row, download job row, or HTTP response).
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("file missing: {0}")]
    FileMissing(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("network stall or reset: {0}")]
    NetworkStall(String),

    #[error("http status {0}")]
    HttpStatus(u32),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("authentication rejected")]
    AuthRejected,

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
