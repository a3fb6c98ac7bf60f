//! Manual smoke-test harness for `container-pool`: runs `Setup`, `Create`,
//! `Destroy` and `Prune` once, end to end, against the reference in-memory
//! UID/subnet/port pools and a temporary depot. Not the RPC/CLI surface the
//! crate's spec scopes out — just a thin way to exercise the library by hand.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use container_pool::filter::IptablesFilterProvider;
use container_pool::resources::{CidrSubnetPool, RangePortPool, RangeUidPool};
use container_pool::rootfs::{DirectoryProvider, RootFsRegistry};
use container_pool::{BackendRegistry, ContainerSpec, ContainerPool, PoolConfig};

#[derive(Parser, Debug)]
#[clap(version, about = "Exercises container-pool's Setup/Create/Destroy/Prune lifecycle once")]
struct Args {
    /// Depot directory; a fresh temp dir is used when omitted.
    #[clap(long)]
    depot: Option<PathBuf>,

    /// Directory containing setup.sh/create.sh/destroy.sh; no-op scripts are
    /// generated into a temp dir when omitted.
    #[clap(long)]
    scripts_root: Option<PathBuf>,

    /// Caller-chosen container handle.
    #[clap(long, default_value = "poolctl-demo")]
    handle: String,

    /// rootfs_path URL. The default empty scheme treats the path as an
    /// already-prepared host directory.
    #[clap(long, default_value = "")]
    rootfs: String,

    /// KEY=VALUE environment entries, repeatable.
    #[clap(long = "env")]
    env: Vec<String>,

    #[clap(long)]
    privileged: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("POOLCTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let scripts_dir;
    let scripts_root = match &args.scripts_root {
        Some(path) => path.clone(),
        None => {
            scripts_dir = tempfile::tempdir().context("creating temp scripts dir")?;
            write_noop_scripts(scripts_dir.path())?;
            scripts_dir.path().to_path_buf()
        }
    };

    let depot_dir;
    let depot_path = match &args.depot {
        Some(path) => path.clone(),
        None => {
            depot_dir = tempfile::tempdir().context("creating temp depot dir")?;
            depot_dir.path().to_path_buf()
        }
    };

    let snapshots_dir = tempfile::tempdir().context("creating temp snapshots dir")?;

    let config = PoolConfig {
        depot_path: depot_path.clone(),
        depot_mount_point_path: depot_path,
        scripts_root,
        disk_quota_enabled: false,
        allow_cidrs: vec![],
        deny_cidrs: vec![],
        external_ip: "10.0.0.1".to_string(),
        container_iface_mtu: 1500,
        bridge_iface: "poolctl0".to_string(),
        iptables_path: PathBuf::from("/bin/true"),
        iptables_chain: "poolctl".to_string(),
        hook_timeout: None,
    };

    let mut rootfs = RootFsRegistry::new();
    rootfs.register("", Box::new(DirectoryProvider::new()));

    let pool = ContainerPool::new(
        config,
        Arc::new(RangeUidPool::new(10000, 64)),
        Arc::new(CidrSubnetPool::new("10.200.0.0/16", 30).map_err(anyhow::Error::msg)?),
        Arc::new(RangePortPool::new(61000, 64)),
        rootfs,
        Box::new(IptablesFilterProvider),
    );

    pool.setup().context("pool setup")?;
    println!("setup: ok");

    let registry = BackendRegistry::new(pool, snapshots_dir.path().to_path_buf());
    registry.start().context("registry start (restore + prune)")?;

    let spec = ContainerSpec {
        handle: args.handle.clone(),
        rootfs_path: args.rootfs,
        env: args.env,
        privileged: args.privileged,
        ..Default::default()
    };

    let container = registry.create(&spec).context("create")?;
    let snapshot = container_pool::container::Snapshot::from(&container);
    println!(
        "create: ok\n{}",
        serde_json::to_string_pretty(&snapshot).context("encoding container snapshot")?
    );

    registry.destroy(&container.handle).context("destroy")?;
    println!("destroy: ok");

    registry.stop();
    println!("stop: ok (snapshots flushed to {})", snapshots_dir.path().display());

    Ok(())
}

fn write_noop_scripts(dir: &Path) -> Result<()> {
    for name in ["setup.sh", "create.sh", "destroy.sh"] {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n")
            .with_context(|| format!("writing {}", path.display()))?;
        std::fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}
