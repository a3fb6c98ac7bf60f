//! End-to-end coverage of `ContainerPool::{create,destroy,restore}` against
//! fake `create.sh`/`destroy.sh` scripts and the in-memory reference
//! resource pools, without any host privileges.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use container_pool::container::{BindMode, BindMount, BindOrigin, ContainerSpec};
use container_pool::error::LibpoolError;
use container_pool::filter::IptablesFilterProvider;
use container_pool::pool::{ContainerPool, PoolConfig};
use container_pool::resources::{CidrSubnetPool, RangePortPool, RangeUidPool};
use container_pool::rootfs::{DirectoryProvider, Provided, RootFsProvider, RootFsRegistry};

struct Scripts {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Scripts {
    /// `create.sh` dumps its environment to `<scripts_root>/env.out` and
    /// exits with `create_exit`; `destroy.sh` appends a line to
    /// `<scripts_root>/destroy_calls.log` and always succeeds.
    fn new(create_exit: i32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        write_script(
            &root.join("setup.sh"),
            "exit 0\n",
        );
        write_script(
            &root.join("create.sh"),
            &format!(
                "dir=$(dirname \"$0\")\nenv > \"$dir/env.out\"\nexit {create_exit}\n"
            ),
        );
        write_script(
            &root.join("destroy.sh"),
            "dir=$(dirname \"$0\")\necho called >> \"$dir/destroy_calls.log\"\nexit 0\n",
        );

        Self { _dir: dir, root }
    }

    fn env_out(&self) -> HashMap<String, String> {
        let contents = fs::read_to_string(self.root.join("env.out")).unwrap();
        contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn destroy_call_count(&self) -> usize {
        fs::read_to_string(self.root.join("destroy_calls.log"))
            .map(|contents| contents.lines().count())
            .unwrap_or(0)
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();
}

fn base_config(scripts: &Scripts, depot: &Path) -> PoolConfig {
    PoolConfig {
        depot_path: depot.to_path_buf(),
        depot_mount_point_path: depot.to_path_buf(),
        scripts_root: scripts.root.clone(),
        disk_quota_enabled: false,
        allow_cidrs: vec![],
        deny_cidrs: vec![],
        external_ip: "10.0.0.1".to_string(),
        container_iface_mtu: 1500,
        bridge_iface: "w-bridge".to_string(),
        iptables_path: PathBuf::from("/bin/true"),
        iptables_chain: "container-pool".to_string(),
        hook_timeout: None,
    }
}

fn default_rootfs() -> RootFsRegistry {
    let mut registry = RootFsRegistry::new();
    registry.register("", Box::new(DirectoryProvider::new()));
    registry
}

#[test]
fn scenario_1_create_default_then_destroy() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();
    let uid_pool = Arc::new(RangeUidPool::new(10000, 2));
    let subnet_pool = Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap());

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        uid_pool.clone(),
        subnet_pool.clone(),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        ..Default::default()
    };
    let container = pool.create(&spec).unwrap();

    let env = scripts.env_out();
    assert_eq!(env.get("user_uid").map(String::as_str), Some("10000"));
    assert_eq!(env.get("root_uid").map(String::as_str), Some("10001"));
    assert_eq!(env.get("rootfs_path").map(String::as_str), Some("/provided/rootfs/path"));
    assert_eq!(env.get("network_container_ip").map(String::as_str), Some("10.2.0.1"));
    assert_eq!(env.get("network_host_ip").map(String::as_str), Some("10.2.0.2"));
    assert_eq!(env.get("network_cidr").map(String::as_str), Some("10.2.0.0/30"));
    assert_eq!(env.get("network_cidr_suffix").map(String::as_str), Some("30"));

    pool.destroy(&container).unwrap();

    // Both uids and the subnet were released: a fresh create draws the same ones.
    let second = pool.create(&spec).unwrap();
    assert_eq!(second.resources.user_uid, 10000);
    assert_eq!(second.resources.root_uid, 10001);
    assert_eq!(second.resources.network.subnet, "10.2.0.0/30");
}

#[test]
fn scenario_2_privileged_draws_only_one_uid() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();
    let uid_pool = Arc::new(RangeUidPool::new(10000, 2));

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        uid_pool,
        Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap()),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        privileged: true,
        ..Default::default()
    };
    let container = pool.create(&spec).unwrap();
    assert_eq!(container.resources.root_uid, 0);
    assert_eq!(container.resources.user_uid, 10000);

    let env = scripts.env_out();
    assert_eq!(env.get("root_uid").map(String::as_str), Some("0"));

    pool.destroy(&container).unwrap();

    // Only user_uid (10000) was released; root_uid 0 was never drawn from the
    // pool, so the pool's full range is available again.
    let second = pool.create(&ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(second.resources.user_uid, 10000);
    assert_eq!(second.resources.root_uid, 10001);
}

#[test]
fn scenario_3_explicit_network_is_honored() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        Arc::new(RangeUidPool::new(10000, 2)),
        Arc::new(CidrSubnetPool::new("10.3.0.0/16", 29).unwrap()),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        network: "10.3.0.0/29".to_string(),
        ..Default::default()
    };
    let container = pool.create(&spec).unwrap();
    assert_eq!(container.resources.network.subnet, "10.3.0.0/29");
    assert_eq!(
        container.resources.network.ip,
        "10.3.0.1".parse::<std::net::Ipv4Addr>().unwrap()
    );

    let env = scripts.env_out();
    assert_eq!(env.get("network_cidr").map(String::as_str), Some("10.3.0.0/29"));
    assert_eq!(env.get("network_cidr_suffix").map(String::as_str), Some("29"));
    assert_eq!(env.get("network_container_ip").map(String::as_str), Some("10.3.0.1"));
    assert_eq!(env.get("network_host_ip").map(String::as_str), Some("10.3.0.6"));
}

#[test]
fn scenario_4_bind_mounts_appended_in_order() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        Arc::new(RangeUidPool::new(10000, 2)),
        Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap()),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        bind_mounts: vec![
            BindMount {
                src_path: "/var/ro-data".to_string(),
                dst_path: "/ro-data".to_string(),
                mode: BindMode::Ro,
                origin: BindOrigin::Host,
            },
            BindMount {
                src_path: "/var/rw-data".to_string(),
                dst_path: "/rw-data".to_string(),
                mode: BindMode::Rw,
                origin: BindOrigin::Host,
            },
            BindMount {
                src_path: "/inner/origin".to_string(),
                dst_path: "/mnt/inner".to_string(),
                mode: BindMode::Rw,
                origin: BindOrigin::Container,
            },
        ],
        ..Default::default()
    };
    let container = pool.create(&spec).unwrap();

    let script = fs::read_to_string(
        depot
            .path()
            .join(&container.id)
            .join("lib/hook-parent-before-clone.sh"),
    )
    .unwrap();

    let ro_pos = script.find("/provided/rootfs/path/ro-data").unwrap();
    let rw_pos = script.find("/provided/rootfs/path/rw-data").unwrap();
    let inner_pos = script.find("/provided/rootfs/path/mnt/inner").unwrap();
    assert!(ro_pos < rw_pos, "ro mount must be appended before rw mount");
    assert!(rw_pos < inner_pos, "host mounts must precede the container-origin mount");
    assert!(script.contains("remount,ro"));
    assert!(script.contains("remount,rw"));
}

#[test]
fn scenario_5_create_failure_rolls_back_everything() {
    let scripts = Scripts::new(1);
    let depot = tempfile::tempdir().unwrap();
    let uid_pool = Arc::new(RangeUidPool::new(10000, 2));
    let subnet_pool = Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap());

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        uid_pool.clone(),
        subnet_pool.clone(),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        ..Default::default()
    };
    let err = pool.create(&spec).unwrap_err();
    assert!(matches!(err, LibpoolError::HookScript { name: "create.sh", .. }));

    // destroy.sh was invoked exactly once, as part of the create.sh rollback.
    assert_eq!(scripts.destroy_call_count(), 1);

    // Every container directory under the depot is gone.
    assert_eq!(fs::read_dir(depot.path()).unwrap().count(), 0);

    // All resources released: a fresh create draws from the start again.
    assert_eq!(uid_pool.acquire().unwrap(), 10000);
    let network = subnet_pool.acquire(None).unwrap();
    assert_eq!(network.subnet, "10.2.0.0/30");
}

#[test]
fn scenario_6_restore_with_root_uid_zero() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();
    let uid_pool = Arc::new(RangeUidPool::new(10000, 5));
    let port_pool = Arc::new(RangePortPool::new(61001, 5));

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        uid_pool.clone(),
        Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap()),
        port_pool.clone(),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let snapshot = serde_json::json!({
        "ID": "abc123",
        "Handle": "abc123",
        "GraceTime": 0,
        "State": "born",
        "Events": [],
        "Resources": {
            "UserUID": 10000,
            "RootUID": 0,
            "Network": { "IP": "10.2.0.1", "Subnet": "10.2.0.0/30" },
            "Ports": [61001, 61002, 61003],
        },
        "EnvVars": [],
    });
    let container = pool
        .restore(std::io::Cursor::new(serde_json::to_vec(&snapshot).unwrap()))
        .unwrap();
    assert_eq!(container.resources.root_uid, 0);

    // root_uid 0 was never removed from the uid pool: 10000 is the only uid
    // held, so the pool still has four free slots, none of them 0.
    assert_eq!(uid_pool.acquire().unwrap(), 10001);

    // All three snapshotted ports were marked held.
    for port in [61001, 61002, 61004] {
        if port == 61004 {
            assert_eq!(port_pool.acquire().unwrap(), 61004);
        } else {
            assert!(port_pool.remove(port).is_err(), "port {port} should already be held");
        }
    }
}

#[test]
fn scenario_7_env_merge_spec_wins_over_rootfs_overlay() {
    struct OverlayProvider;
    impl RootFsProvider for OverlayProvider {
        fn provide(
            &self,
            _id: &str,
            _uri: &url::Url,
        ) -> Result<Provided, container_pool::rootfs::RootfsError> {
            Ok(Provided {
                mount_path: "/provided/rootfs/path".to_string(),
                env_overlay: vec!["var2=rootfs2".to_string(), "var3=rootfs3".to_string()],
            })
        }
        fn cleanup(&self, _id: &str) -> Result<(), container_pool::rootfs::RootfsError> {
            Ok(())
        }
    }

    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();
    let mut rootfs = RootFsRegistry::new();
    rootfs.register("overlay", Box::new(OverlayProvider));

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        Arc::new(RangeUidPool::new(10000, 2)),
        Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap()),
        Arc::new(RangePortPool::new(61001, 3)),
        rootfs,
        Box::new(IptablesFilterProvider),
    );

    let spec = ContainerSpec {
        rootfs_path: "overlay:///provided/rootfs/path".to_string(),
        env: vec!["var1=spec1".to_string(), "var2=spec2".to_string()],
        ..Default::default()
    };
    let container = pool.create(&spec).unwrap();

    assert_eq!(container.env.get("var1"), Some("spec1"));
    assert_eq!(container.env.get("var2"), Some("spec2"));
    assert_eq!(container.env.get("var3"), Some("rootfs3"));
}

#[test]
fn containers_superset_filter_still_holds_through_a_full_create() {
    let scripts = Scripts::new(0);
    let depot = tempfile::tempdir().unwrap();

    let pool = ContainerPool::new(
        base_config(&scripts, depot.path()),
        Arc::new(RangeUidPool::new(10000, 2)),
        Arc::new(CidrSubnetPool::new("10.2.0.0/24", 30).unwrap()),
        Arc::new(RangePortPool::new(61001, 3)),
        default_rootfs(),
        Box::new(IptablesFilterProvider),
    );

    let mut spec = ContainerSpec {
        rootfs_path: "file:///provided/rootfs/path".to_string(),
        ..Default::default()
    };
    spec.properties.insert("app".to_string(), "web".to_string());
    let container = pool.create(&spec).unwrap();

    let mut filter = BTreeMap::new();
    filter.insert("app".to_string(), "web".to_string());
    assert!(container.matches(&filter));
}
