//! Self-contained JSON representation of a [`Container`], sufficient to
//! reconstruct it via [`crate::pool::ContainerPool::restore`] without host
//! scripts.
use serde::{Deserialize, Serialize};

use crate::container::{Container, ContainerStatus};
use crate::resources::{Network, Resources};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LimitsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<serde_json::Value>,
    #[serde(rename = "CPU", skip_serializing_if = "Option::is_none")]
    pub cpu: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourcesSnapshot {
    #[serde(rename = "UserUID")]
    pub user_uid: u32,
    #[serde(rename = "RootUID")]
    pub root_uid: u32,
    pub network: Network,
    pub ports: Vec<u32>,
}

impl From<&Resources> for ResourcesSnapshot {
    fn from(resources: &Resources) -> Self {
        Self {
            user_uid: resources.user_uid,
            root_uid: resources.root_uid,
            network: resources.network.clone(),
            ports: resources.ports.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessSnapshot {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "TTY")]
    pub tty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(rename = "ID")]
    pub id: String,
    pub handle: String,
    /// Whole seconds; sub-second grace times are not representable on the wire.
    pub grace_time: u64,
    pub state: ContainerStatus,
    pub events: Vec<String>,
    #[serde(default)]
    pub limits: LimitsSnapshot,
    pub resources: ResourcesSnapshot,
    #[serde(default)]
    pub processes: Vec<ProcessSnapshot>,
    #[serde(default)]
    pub net_ins: Vec<serde_json::Value>,
    #[serde(default)]
    pub net_outs: Vec<serde_json::Value>,
    #[serde(default)]
    pub properties: std::collections::BTreeMap<String, String>,
    pub env_vars: Vec<String>,
}

impl From<&Container> for Snapshot {
    fn from(container: &Container) -> Self {
        Self {
            id: container.id.clone(),
            handle: container.handle.clone(),
            grace_time: container.grace_time.as_secs(),
            state: container.state,
            events: container.events.clone(),
            limits: LimitsSnapshot::default(),
            resources: ResourcesSnapshot::from(&container.resources),
            processes: Vec::new(),
            net_ins: Vec::new(),
            net_outs: Vec::new(),
            properties: container.properties.clone(),
            env_vars: container.env.array(),
        }
    }
}
