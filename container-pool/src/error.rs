//! Crate-wide error aggregation.
//!
//! Every module that can fail defines its own error enum (`EnvError`,
//! `PoolError`, `RootfsError`, `FilterError`, `HookError`, `DepotError`);
//! `LibpoolError` aggregates them behind `#[from]` so the public
//! `ContainerPool`/`BackendRegistry` API has a single error type, mirroring
//! how the teacher's `LibcontainerError` aggregates `TTYError`,
//! `RootfsError`, and friends.
use std::path::PathBuf;

use crate::depot::DepotError;
use crate::env::EnvError;
use crate::filter::FilterError;
use crate::hooks::HookError;
use crate::resources::PoolError;
use crate::rootfs::RootfsError;

#[derive(Debug, thiserror::Error)]
pub enum LibpoolError {
    #[error(transparent)]
    MalformedEnvironment(#[from] EnvError),
    #[error(transparent)]
    ResourceAcquire(#[from] PoolError),
    #[error(transparent)]
    Rootfs(#[from] RootfsError),
    #[error("container_pool: set up filter: {0}")]
    SetupFilter(#[source] FilterError),
    #[error("container_pool: setting up allow rules in iptables: {0}")]
    SetupIptables(#[source] FilterError),
    #[error(transparent)]
    Depot(#[from] DepotError),
    #[error("running hook script {name}: {source}")]
    HookScript {
        name: &'static str,
        #[source]
        source: HookError,
    },
    #[error("handle {handle:?} already exists")]
    HandleExists { handle: String },
    #[error("container {handle:?} not found")]
    ContainerNotFound { handle: String },
    #[error("failed to snapshot container {id:?}: {source}")]
    FailedToSnapshot {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading snapshot {path:?}: {source}")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding snapshot: {0}")]
    DeserializeSnapshot(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LibpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_exists_message_names_the_handle() {
        let err = LibpoolError::HandleExists {
            handle: "web-1".to_string(),
        };
        assert_eq!(err.to_string(), "handle \"web-1\" already exists");
    }

    #[test]
    fn setup_filter_message_matches_spec_wording() {
        let err = LibpoolError::SetupFilter(FilterError::Script(HookError::NonZeroExit {
            path: "/sbin/iptables".to_string(),
            code: 1,
        }));
        assert!(err
            .to_string()
            .starts_with("container_pool: set up filter: "));
    }
}
