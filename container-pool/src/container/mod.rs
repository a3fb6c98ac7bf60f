//! Container record, lifecycle state and the snapshot wire format used to
//! persist and restore it across daemon restarts.
#[allow(clippy::module_inception)]
mod container;
mod snapshot;
mod state;

pub use container::{BindMode, BindMount, BindOrigin, Container, ContainerSpec};
pub use snapshot::{LimitsSnapshot, ProcessSnapshot, ResourcesSnapshot, Snapshot};
pub use state::ContainerStatus;
