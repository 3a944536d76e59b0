use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backup::BackupId;

/// Failure kinds surfaced by server operations.
///
/// Callers are expected to branch on the variant, not on the message;
/// benign cases (stopping an already-stopped server, deleting an absent
/// directory) never reach this type.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server directory already exists: {}", dir.display())]
    AlreadyExists { dir: PathBuf },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("server is still running")]
    StillRunning,

    #[error("failed to spawn server process")]
    Spawn {
        #[source]
        source: io::Error,
    },

    #[error("backup handshake failed at step '{step}'")]
    Handshake { step: &'static str },

    #[error("timed out waiting for {waiting_for}")]
    Timeout { waiting_for: &'static str },

    #[error("backup {id} not found")]
    BackupNotFound { id: BackupId },

    #[error("i/o error")]
    Io(#[from] io::Error),

    #[error("malformed configuration")]
    Config(#[from] serde_json::Error),

    #[error("download failed")]
    Download(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
