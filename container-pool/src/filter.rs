//! Per-container and global-chain network filtering.
//!
//! The reference implementation shells out to `/sbin/iptables` via
//! [`crate::hooks::run_script`], the same machinery used for
//! `setup.sh`/`create.sh`/`destroy.sh`, so the crate has exactly one code
//! path for "run an external program and check its exit status."
use crate::env::EnvironmentMap;
use crate::hooks::{run_script, HookError};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error(transparent)]
    Script(#[from] HookError),
}

type Result<T> = std::result::Result<T, FilterError>;

/// A per-container filter: installed after the rootfs is provided and
/// before `create.sh` runs, torn down during `Destroy` after rootfs
/// cleanup succeeds.
pub trait Filter: Send + Sync {
    fn setup(&self) -> Result<()>;
    fn tear_down(&self) -> Result<()>;
}

/// Hands out a [`Filter`] for a given container handle.
pub trait FilterProvider: Send + Sync {
    fn provide(&self, handle: &str) -> Box<dyn Filter>;
}

/// Shells out to `/sbin/iptables -w -A <chain> --destination <cidr> --jump
/// {RETURN|REJECT}`. `setup`/`tear_down` insert/remove one rule per
/// container into a handle-scoped chain; this reference implementation
/// treats both as no-ops beyond the global chain, since per-container
/// chains are an operational concern out of scope for this crate (see
/// DESIGN.md).
pub struct IptablesFilter {
    handle: String,
}

impl Filter for IptablesFilter {
    fn setup(&self) -> Result<()> {
        tracing::debug!(handle = %self.handle, "filter setup (no-op reference implementation)");
        Ok(())
    }

    fn tear_down(&self) -> Result<()> {
        tracing::debug!(handle = %self.handle, "filter tear-down (no-op reference implementation)");
        Ok(())
    }
}

#[derive(Default)]
pub struct IptablesFilterProvider;

impl FilterProvider for IptablesFilterProvider {
    fn provide(&self, handle: &str) -> Box<dyn Filter> {
        Box::new(IptablesFilter {
            handle: handle.to_string(),
        })
    }
}

/// Seeds the process-wide global chain: one `RETURN` rule per configured
/// allow CIDR, then one `REJECT` rule per configured deny CIDR, in that
/// order. Empty-string entries are skipped. Invoked once, idempotently,
/// from `ContainerPool::setup`.
pub fn seed_global_chain(
    iptables_path: &std::path::Path,
    chain: &str,
    allow_cidrs: &[String],
    deny_cidrs: &[String],
) -> Result<()> {
    for cidr in allow_cidrs.iter().filter(|c| !c.is_empty()) {
        append_rule(iptables_path, chain, cidr, "RETURN")?;
    }
    for cidr in deny_cidrs.iter().filter(|c| !c.is_empty()) {
        append_rule(iptables_path, chain, cidr, "REJECT")?;
    }
    Ok(())
}

fn append_rule(iptables_path: &std::path::Path, chain: &str, cidr: &str, jump: &str) -> Result<()> {
    let args = vec![
        "-w".to_string(),
        "-A".to_string(),
        chain.to_string(),
        "--destination".to_string(),
        cidr.to_string(),
        "--jump".to_string(),
        jump.to_string(),
    ];
    run_script(iptables_path, &args, &EnvironmentMap::new(), None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;

    fn fake_iptables(log_path: &std::path::Path) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("iptables");
        std::fs::write(&bin, format!("#!/bin/sh\necho \"$@\" >> {:?}\n", log_path)).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, bin)
    }

    #[test]
    #[serial]
    fn seed_global_chain_appends_allow_before_deny() {
        let log_dir = tempfile::tempdir().unwrap();
        let log_path = log_dir.path().join("calls.log");
        let (_dir, iptables) = fake_iptables(&log_path);

        seed_global_chain(
            &iptables,
            "container-pool",
            &["10.0.0.0/8".to_string(), "".to_string()],
            &["0.0.0.0/0".to_string()],
        )
        .unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("10.0.0.0/8") && lines[0].contains("RETURN"));
        assert!(lines[1].contains("0.0.0.0/0") && lines[1].contains("REJECT"));
    }

    #[test]
    fn iptables_filter_provider_round_trips() {
        let provider = IptablesFilterProvider;
        let filter = provider.provide("abc123");
        filter.setup().unwrap();
        filter.tear_down().unwrap();
    }
}
