//! Daemon-wide error aggregation, mirroring how `container-pool`'s
//! `LibpoolError` aggregates its per-module errors.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("binding socket {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("removing stale socket {path:?}: {source}")]
    RemoveStaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("creating socket parent directory {path:?}: {source}")]
    CreateSocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opening pty: {0}")]
    OpenPty(#[source] nix::Error),
    #[error("opening /dev/null: {0}")]
    OpenDevNull(#[source] std::io::Error),
    #[error("creating pipe: {0}")]
    Pipe(#[from] crate::pipe::PipeError),
    #[error("setting window size: {0}")]
    SetWindowSize(#[source] nix::Error),
    #[error("spawning child {path:?}: {source}")]
    SpawnChild {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sending file descriptors: {0}")]
    SendFds(#[source] nix::Error),
    #[error("accepting connection: {0}")]
    Accept(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
