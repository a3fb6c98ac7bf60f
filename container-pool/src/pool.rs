//! Factory and lifecycle manager for containers on a single host: resource
//! acquisition with rollback, depot persistence, and restore/prune
//! reconciliation after a daemon restart. The heart of this crate.
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::container::{Container, ContainerSpec, ContainerStatus, Snapshot};
use crate::depot;
use crate::env::EnvironmentMap;
use crate::error::{LibpoolError, Result};
use crate::filter::{seed_global_chain, FilterProvider};
use crate::hooks::run_script;
use crate::resources::{Network, PortPool, Resources, SubnetPool, UidPool};
use crate::rootfs::RootFsRegistry;

/// Explicit, caller-constructed configuration for a [`ContainerPool`]. No
/// part of the pool reads ambient configuration (env vars, global
/// singletons) beyond what is threaded in here.
pub struct PoolConfig {
    pub depot_path: PathBuf,
    pub depot_mount_point_path: PathBuf,
    /// Directory containing `setup.sh`, `create.sh`, `destroy.sh`.
    pub scripts_root: PathBuf,
    pub disk_quota_enabled: bool,
    pub allow_cidrs: Vec<String>,
    pub deny_cidrs: Vec<String>,
    pub external_ip: String,
    pub container_iface_mtu: u32,
    pub bridge_iface: String,
    pub iptables_path: PathBuf,
    pub iptables_chain: String,
    pub hook_timeout: Option<Duration>,
}

fn host_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string())
}

pub struct ContainerPool {
    config: PoolConfig,
    uid_pool: Arc<dyn UidPool>,
    subnet_pool: Arc<dyn SubnetPool>,
    port_pool: Arc<dyn PortPool>,
    rootfs: RootFsRegistry,
    filter_provider: Box<dyn FilterProvider>,
}

impl ContainerPool {
    pub fn new(
        config: PoolConfig,
        uid_pool: Arc<dyn UidPool>,
        subnet_pool: Arc<dyn SubnetPool>,
        port_pool: Arc<dyn PortPool>,
        rootfs: RootFsRegistry,
        filter_provider: Box<dyn FilterProvider>,
    ) -> Self {
        Self {
            config,
            uid_pool,
            subnet_pool,
            port_pool,
            rootfs,
            filter_provider,
        }
    }

    /// Idempotent host-wide preparation: runs `setup.sh`, then seeds the
    /// global iptables chain. Script first, then iptables, in that order.
    #[tracing::instrument(skip(self))]
    pub fn setup(&self) -> Result<()> {
        let mut env = EnvironmentMap::new();
        env.insert("CONTAINER_DEPOT_PATH", self.config.depot_path.display().to_string());
        env.insert(
            "CONTAINER_DEPOT_MOUNT_POINT_PATH",
            self.config.depot_mount_point_path.display().to_string(),
        );
        env.insert(
            "DISK_QUOTA_ENABLED",
            if self.config.disk_quota_enabled { "true" } else { "false" },
        );
        env.insert("PATH", host_path());

        run_script(
            &self.config.scripts_root.join("setup.sh"),
            &[],
            &env,
            self.config.hook_timeout,
        )
        .map_err(|source| LibpoolError::HookScript { name: "setup.sh", source })?;

        seed_global_chain(
            &self.config.iptables_path,
            &self.config.iptables_chain,
            &self.config.allow_cidrs,
            &self.config.deny_cidrs,
        )
        .map_err(LibpoolError::SetupIptables)?;

        Ok(())
    }

    pub fn max_containers(&self) -> usize {
        self.uid_pool.initial_size().min(self.subnet_pool.initial_size())
    }

    #[tracing::instrument(skip(self, spec))]
    pub fn create(&self, spec: &ContainerSpec) -> Result<Container> {
        let id = generate_id();
        tracing::debug!(id = %id, "creating container");

        // Step 2: parse env before any resource is held.
        let parsed_env = EnvironmentMap::parse(&spec.env)?;

        // Step 3-4: UIDs.
        let user_uid = self.uid_pool.acquire()?;
        let root_uid = if spec.privileged {
            0
        } else {
            match self.uid_pool.acquire() {
                Ok(uid) => uid,
                Err(err) => {
                    self.uid_pool.release(user_uid);
                    return Err(err.into());
                }
            }
        };

        let result = self.create_after_uids(&id, spec, &parsed_env, user_uid, root_uid);
        if result.is_err() {
            if root_uid != 0 {
                self.uid_pool.release(root_uid);
            }
            self.uid_pool.release(user_uid);
        }
        result
    }

    fn create_after_uids(
        &self,
        id: &str,
        spec: &ContainerSpec,
        parsed_env: &EnvironmentMap,
        user_uid: u32,
        root_uid: u32,
    ) -> Result<Container> {
        // Steps 5-6: resolve rootfs provider.
        let (scheme, provider) = self.rootfs.resolve(&spec.rootfs_path)?;

        // Step 7: network.
        let requested = if spec.network.is_empty() { None } else { Some(spec.network.as_str()) };
        let network = self.subnet_pool.acquire(requested)?;

        let result = self.create_after_network(id, spec, parsed_env, user_uid, root_uid, &scheme, provider, &network);
        if result.is_err() {
            self.subnet_pool.release(&network);
        }
        result
    }

    fn create_after_network(
        &self,
        id: &str,
        spec: &ContainerSpec,
        parsed_env: &EnvironmentMap,
        user_uid: u32,
        root_uid: u32,
        scheme: &str,
        provider: &dyn crate::rootfs::RootFsProvider,
        network: &Network,
    ) -> Result<Container> {
        // Step 8: provide rootfs. An empty RootFSPath (default scheme, no
        // URL to parse) becomes an empty-path URL; the directory provider
        // reads it back out via `uri.path()`.
        let uri = if spec.rootfs_path.is_empty() {
            url::Url::parse("file:///").expect("static URL always parses")
        } else {
            url::Url::parse(&spec.rootfs_path).map_err(|e| {
                crate::rootfs::RootfsError::Url(spec.rootfs_path.clone(), e)
            })?
        };
        let provided = provider.provide(id, &uri)?;

        let result = self.create_after_rootfs(
            id, spec, parsed_env, user_uid, root_uid, scheme, provider, network, &provided,
        );
        if result.is_err() {
            let _ = provider.cleanup(id);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn create_after_rootfs(
        &self,
        id: &str,
        spec: &ContainerSpec,
        parsed_env: &EnvironmentMap,
        user_uid: u32,
        root_uid: u32,
        scheme: &str,
        _provider: &dyn crate::rootfs::RootFsProvider,
        network: &Network,
        provided: &crate::rootfs::Provided,
    ) -> Result<Container> {
        // Step 9: merge environments, spec wins.
        let overlay = EnvironmentMap::parse(&provided.env_overlay)?;
        let merged_env = overlay.merge(parsed_env);

        // Step 10: cnet config. This reference implementation persists an
        // empty JSON object; a real cnet builder would compute one here.
        // (no separate acquisition to roll back)

        // Step 11: depot directory.
        depot::create_container_dir(&self.config.depot_path, id)?;
        let create_result = self.create_after_depot(
            id, spec, &merged_env, user_uid, root_uid, scheme, network, provided,
        );
        if create_result.is_err() {
            let _ = depot::remove_container_dir(&self.config.depot_path, id);
        }
        create_result
    }

    #[allow(clippy::too_many_arguments)]
    fn create_after_depot(
        &self,
        id: &str,
        spec: &ContainerSpec,
        merged_env: &EnvironmentMap,
        user_uid: u32,
        root_uid: u32,
        scheme: &str,
        network: &Network,
        provided: &crate::rootfs::Provided,
    ) -> Result<Container> {
        depot::write_rootfs_provider(&self.config.depot_path, id, scheme)?;
        depot::write_cnet_config(&self.config.depot_path, id, "{}")?;

        // Step 12: bind mounts.
        for mount in &spec.bind_mounts {
            depot::append_bind_mount(&self.config.depot_path, id, &provided.mount_path, mount)?;
        }

        // Step 13: per-container filter.
        let filter = self.filter_provider.provide(&spec.handle);
        filter.setup().map_err(LibpoolError::SetupFilter)?;

        let result = self.create_after_filter(id, spec, merged_env, user_uid, root_uid, scheme, network, provided, filter.as_ref());
        if result.is_err() {
            let _ = filter.tear_down();
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn create_after_filter(
        &self,
        id: &str,
        spec: &ContainerSpec,
        merged_env: &EnvironmentMap,
        user_uid: u32,
        root_uid: u32,
        scheme: &str,
        network: &Network,
        provided: &crate::rootfs::Provided,
        _filter: &dyn crate::filter::Filter,
    ) -> Result<Container> {
        // Step 14: create.sh.
        let prefix_len = network.prefix_len()?;
        let host_ip = network.host_ip()?;

        let mut env = EnvironmentMap::new();
        env.insert("PATH", host_path());
        env.insert("bridge_iface", self.config.bridge_iface.as_str());
        env.insert("container_iface_mtu", self.config.container_iface_mtu.to_string());
        env.insert("external_ip", self.config.external_ip.as_str());
        env.insert("id", id);
        env.insert("network_cidr", network.subnet.as_str());
        env.insert("network_cidr_suffix", prefix_len.to_string());
        env.insert("network_container_ip", network.ip.to_string());
        env.insert("network_host_ip", host_ip.to_string());
        env.insert("root_uid", root_uid.to_string());
        env.insert("rootfs_path", provided.mount_path.as_str());
        env.insert("user_uid", user_uid.to_string());

        let depot_dir = depot::container_dir(&self.config.depot_path, id);
        let args = vec![depot_dir.display().to_string()];

        if let Err(source) = run_script(
            &self.config.scripts_root.join("create.sh"),
            &args,
            &env,
            self.config.hook_timeout,
        ) {
            let _ = self.run_destroy_script(id);
            return Err(LibpoolError::HookScript { name: "create.sh", source });
        }

        // Step 15: construct the container record.
        Ok(Container {
            id: id.to_string(),
            handle: if spec.handle.is_empty() { id.to_string() } else { spec.handle.clone() },
            grace_time: spec.grace_time,
            properties: spec.properties.clone(),
            resources: Resources {
                user_uid,
                root_uid,
                network: network.clone(),
                ports: Vec::new(),
            },
            state: ContainerStatus::Born,
            events: vec!["born".to_string()],
            env: merged_env.clone(),
            rootfs_provider_tag: scheme.to_string(),
        })
    }

    fn run_destroy_script(&self, id: &str) -> Result<()> {
        let depot_dir = depot::container_dir(&self.config.depot_path, id);
        let mut env = EnvironmentMap::new();
        env.insert("PATH", host_path());
        run_script(
            &self.config.scripts_root.join("destroy.sh"),
            &[depot_dir.display().to_string()],
            &env,
            self.config.hook_timeout,
        )
        .map_err(|source| LibpoolError::HookScript { name: "destroy.sh", source })
    }

    /// Decodes a snapshot and re-acquires exactly the resources it records,
    /// rolling back on any single failure (an already-taken value is not
    /// observable partial state; see DESIGN.md).
    #[tracing::instrument(skip(self, reader))]
    pub fn restore(&self, reader: impl Read) -> Result<Container> {
        let snapshot: Snapshot =
            serde_json::from_reader(reader).map_err(LibpoolError::DeserializeSnapshot)?;

        self.uid_pool.remove(snapshot.resources.user_uid)?;

        if snapshot.resources.root_uid != 0 {
            if let Err(err) = self.uid_pool.remove(snapshot.resources.root_uid) {
                self.uid_pool.release(snapshot.resources.user_uid);
                return Err(err.into());
            }
        }

        if let Err(err) = self.subnet_pool.remove(&snapshot.resources.network) {
            self.uid_pool.release(snapshot.resources.user_uid);
            if snapshot.resources.root_uid != 0 {
                self.uid_pool.release(snapshot.resources.root_uid);
            }
            return Err(err.into());
        }

        let mut removed_ports = Vec::new();
        for port in &snapshot.resources.ports {
            if let Err(err) = self.port_pool.remove(*port) {
                for removed in &removed_ports {
                    self.port_pool.release(*removed);
                }
                self.subnet_pool.release(&snapshot.resources.network);
                self.uid_pool.release(snapshot.resources.user_uid);
                if snapshot.resources.root_uid != 0 {
                    self.uid_pool.release(snapshot.resources.root_uid);
                }
                return Err(err.into());
            }
            removed_ports.push(*port);
        }

        Ok(Container {
            id: snapshot.id,
            handle: snapshot.handle,
            grace_time: Duration::from_secs(snapshot.grace_time),
            properties: snapshot.properties,
            resources: Resources {
                user_uid: snapshot.resources.user_uid,
                root_uid: snapshot.resources.root_uid,
                network: snapshot.resources.network,
                ports: snapshot.resources.ports,
            },
            state: snapshot.state,
            events: snapshot.events,
            env: EnvironmentMap::parse(&snapshot.env_vars)?,
            rootfs_provider_tag: String::new(),
        })
    }

    /// Cleans up the rootfs, runs `destroy.sh`, and only then releases
    /// resources. Any failure in cleanup or `destroy.sh` returns
    /// immediately with no resource released.
    #[tracing::instrument(skip(self, container))]
    pub fn destroy(&self, container: &Container) -> Result<()> {
        if let Ok(scheme) = depot::read_rootfs_provider(&self.config.depot_path, &container.id) {
            if let Some(provider) = self.rootfs.get(&scheme) {
                provider.cleanup(&container.id)?;
            }
        }

        self.run_destroy_script(&container.id)?;

        for port in &container.resources.ports {
            self.port_pool.release(*port);
        }
        if container.resources.root_uid != 0 {
            self.uid_pool.release(container.resources.root_uid);
        }
        self.uid_pool.release(container.resources.user_uid);
        self.subnet_pool.release(&container.resources.network);

        let filter = self.filter_provider.provide(&container.handle);
        let _ = filter.tear_down();

        Ok(())
    }

    /// Reconciles the on-disk depot against `keep`: every directory not in
    /// `keep` and not [`depot::RESERVED_DIR`] gets `destroy.sh` run
    /// (best-effort; logged and skipped on failure) and, if that succeeds,
    /// its rootfs provider cleaned up (unknown schemes are logged and
    /// skipped, not fatal).
    #[tracing::instrument(skip(self, keep))]
    pub fn prune(&self, keep: &std::collections::HashSet<String>) -> Result<()> {
        let ids = depot::list_container_ids(&self.config.depot_path)?;

        for id in ids {
            if id == depot::RESERVED_DIR || keep.contains(&id) {
                continue;
            }

            if let Err(err) = self.run_destroy_script(&id) {
                tracing::warn!(id = %id, error = %err, "prune: destroy.sh failed, skipping");
                continue;
            }

            match depot::read_rootfs_provider(&self.config.depot_path, &id) {
                Ok(scheme) => match self.rootfs.get(&scheme) {
                    Some(provider) => {
                        if let Err(err) = provider.cleanup(&id) {
                            tracing::warn!(id = %id, error = %err, "prune: rootfs cleanup failed, ignoring");
                        }
                    }
                    None => {
                        tracing::warn!(id = %id, scheme = %scheme, "prune: unknown rootfs provider scheme, skipping cleanup");
                    }
                },
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "prune: could not read rootfs-provider file, skipping cleanup");
                }
            }
        }

        Ok(())
    }
}

fn generate_id() -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    (0..16)
        .map(|_| CHARS[fastrand::usize(..CHARS.len())] as char)
        .collect()
}
