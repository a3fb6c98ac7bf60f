//! Container lifecycle state.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Where a container sits in its lifecycle: `born` until the pool finishes
/// `Create`, `active` once the backend has started it, `stopped` after
/// `Destroy` completes but before the record is discarded.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContainerStatus {
    #[default]
    Born,
    Active,
    Stopped,
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Born => "born",
            Self::Active => "active",
            Self::Stopped => "stopped",
        };
        write!(f, "{print}")
    }
}
