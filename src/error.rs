//! Error taxonomy for sync runs, imports and purchase relays.
use std::path::PathBuf;
use thiserror::Error;

/// Run-level failures. Every variant except `AlreadyRunning` aborts the run
/// before anything reaches the importer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("credentials rejected by marketplace (status {status})")]
    Auth { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("import failed: {0}")]
    Import(#[from] ImportError),
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error("sync worker has shut down")]
    WorkerStopped,
}

impl SyncError {
    /// Only transport-level failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("refusing to write an artifact without records")]
    Empty,
    #[error("cannot write artifact in {}: {source}", .dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("artifact writer task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("catalog importer unavailable: {0}")]
    Unavailable(String),
    #[error("catalog importer rejected the artifact: {0}")]
    Rejected(String),
    #[error("cannot read artifact {}: {reason}", .path.display())]
    Artifact { path: PathBuf, reason: String },
    #[error("catalog database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid purchase event: {0}")]
    InvalidEvent(&'static str),
    #[error("purchase push failed: {0}")]
    Push(#[source] SyncError),
    #[error("marketplace rejected purchase (status {0})")]
    Rejected(u16),
    #[error("resync could not be requested: {0}")]
    Resync(String),
}
