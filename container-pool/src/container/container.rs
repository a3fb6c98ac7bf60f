use std::collections::BTreeMap;
use std::time::Duration;

use crate::container::ContainerStatus;
use crate::env::EnvironmentMap;
use crate::resources::Resources;

/// Which side of the bind mount a relative source path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOrigin {
    /// `src_path` is an absolute host path.
    Host,
    /// `src_path` is resolved inside the container's own rootfs.
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Ro,
    Rw,
}

impl BindMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindMode::Ro => "ro",
            BindMode::Rw => "rw",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindMount {
    pub src_path: String,
    pub dst_path: String,
    pub mode: BindMode,
    pub origin: BindOrigin,
}

/// Caller-supplied parameters for [`crate::pool::ContainerPool::create`].
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Caller-chosen name; defaults to the generated id when empty.
    pub handle: String,
    pub grace_time: Duration,
    pub properties: BTreeMap<String, String>,
    /// Parsed as a URL; empty string selects the default rootfs provider.
    pub rootfs_path: String,
    pub bind_mounts: Vec<BindMount>,
    /// Caller-requested CIDR; empty means "any subnet".
    pub network: String,
    /// Raw `KEY=VALUE` entries, parsed by the pool.
    pub env: Vec<String>,
    pub privileged: bool,
}

/// A live container record, held by the backend registry for as long as the
/// container exists.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub handle: String,
    pub grace_time: Duration,
    pub properties: BTreeMap<String, String>,
    pub resources: Resources,
    pub state: ContainerStatus,
    pub events: Vec<String>,
    pub env: EnvironmentMap,
    /// The rootfs provider scheme selected at create time (`""` for default).
    pub rootfs_provider_tag: String,
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn status(&self) -> ContainerStatus {
        self.state
    }

    pub fn set_status(&mut self, status: ContainerStatus) {
        self.state = status;
    }

    pub fn add_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    /// Properties are a superset-match target for `BackendRegistry::containers`:
    /// every key in `filter` must be present in `self.properties` with an
    /// equal value.
    pub fn matches(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.properties.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Network;
    use std::net::Ipv4Addr;

    fn sample_container() -> Container {
        Container {
            id: "abc123".to_string(),
            handle: "abc123".to_string(),
            grace_time: Duration::from_secs(0),
            properties: BTreeMap::new(),
            resources: Resources {
                user_uid: 10000,
                root_uid: 10001,
                network: Network {
                    ip: Ipv4Addr::new(10, 2, 0, 1),
                    subnet: "10.2.0.0/30".to_string(),
                },
                ports: vec![],
            },
            state: ContainerStatus::Born,
            events: vec![],
            env: EnvironmentMap::new(),
            rootfs_provider_tag: String::new(),
        }
    }

    #[test]
    fn matches_requires_every_filter_key() {
        let mut container = sample_container();
        container.properties.insert("app".to_string(), "web".to_string());
        container.properties.insert("tier".to_string(), "front".to_string());

        let mut filter = BTreeMap::new();
        filter.insert("app".to_string(), "web".to_string());
        assert!(container.matches(&filter));

        filter.insert("tier".to_string(), "back".to_string());
        assert!(!container.matches(&filter));
    }

    #[test]
    fn matches_empty_filter_always_true() {
        let container = sample_container();
        assert!(container.matches(&BTreeMap::new()));
    }

    #[test]
    fn add_event_appends_in_order() {
        let mut container = sample_container();
        container.add_event("born");
        container.add_event("active");
        assert_eq!(container.events, vec!["born", "active"]);
    }
}
