//! Per-container working directory layout under the depot root.
//!
//! `<depot>/<id>/`:
//! - `rootfs-provider` — plain-text scheme string (empty file == default).
//! - `cnetConfig.json` — opaque JSON blob owned by the cnet subsystem.
//! - `lib/hook-parent-before-clone.sh` — append-only bind-mount script.
use std::fs;
use std::path::{Path, PathBuf};

use crate::container::{BindMount, BindOrigin};

const ROOTFS_PROVIDER_FILE: &str = "rootfs-provider";
const CNET_CONFIG_FILE: &str = "cnetConfig.json";
const HOOK_SCRIPT_PATH: &str = "lib/hook-parent-before-clone.sh";
/// Directories under the depot root that `Prune` never treats as a
/// container, regardless of `keep`.
pub const RESERVED_DIR: &str = "tmp";

#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    #[error("creating depot directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("removing depot directory {path:?}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("listing depot root {path:?}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, DepotError>;

pub fn container_dir(depot_root: &Path, id: &str) -> PathBuf {
    depot_root.join(id)
}

/// Creates `<depot>/<id>/lib/` (and therefore `<depot>/<id>/` itself).
pub fn create_container_dir(depot_root: &Path, id: &str) -> Result<PathBuf> {
    let dir = container_dir(depot_root, id);
    let lib_dir = dir.join("lib");
    fs::create_dir_all(&lib_dir).map_err(|source| DepotError::CreateDir {
        path: lib_dir,
        source,
    })?;
    Ok(dir)
}

pub fn remove_container_dir(depot_root: &Path, id: &str) -> Result<()> {
    let dir = container_dir(depot_root, id);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DepotError::RemoveDir { path: dir, source }),
    }
}

pub fn write_rootfs_provider(depot_root: &Path, id: &str, scheme: &str) -> Result<()> {
    let path = container_dir(depot_root, id).join(ROOTFS_PROVIDER_FILE);
    fs::write(&path, scheme).map_err(|source| DepotError::Write { path, source })
}

pub fn read_rootfs_provider(depot_root: &Path, id: &str) -> Result<String> {
    let path = container_dir(depot_root, id).join(ROOTFS_PROVIDER_FILE);
    fs::read_to_string(&path).map_err(|source| DepotError::Read { path, source })
}

pub fn write_cnet_config(depot_root: &Path, id: &str, raw_json: &str) -> Result<()> {
    let path = container_dir(depot_root, id).join(CNET_CONFIG_FILE);
    fs::write(&path, raw_json).map_err(|source| DepotError::Write { path, source })
}

/// Appends one bind-mount's shell fragment to the container's
/// hook-parent-before-clone script: a blank line, `mkdir -p`, the initial
/// bind mount, then a remount to apply the final `ro`/`rw` mode.
pub fn append_bind_mount(
    depot_root: &Path,
    id: &str,
    rootfs_path: &str,
    mount: &BindMount,
) -> Result<()> {
    let path = container_dir(depot_root, id).join(HOOK_SCRIPT_PATH);
    let target = format!("{rootfs_path}/{}", mount.dst_path.trim_start_matches('/'));
    let source = match mount.origin {
        BindOrigin::Host => mount.src_path.clone(),
        BindOrigin::Container => {
            format!("{rootfs_path}/{}", mount.src_path.trim_start_matches('/'))
        }
    };

    let fragment = format!(
        "\nmkdir -p {target}\nmount -n --bind {source} {target}\nmount -n --bind -o remount,{mode} {source} {target}\n",
        mode = mount.mode.as_str(),
    );

    let mut file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|source| DepotError::Write {
            path: path.clone(),
            source,
        })?;
    use std::io::Write;
    file.write_all(fragment.as_bytes())
        .map_err(|source| DepotError::Write { path, source })
}

/// Lists immediate subdirectory names of the depot root, for `Prune`.
pub fn list_container_ids(depot_root: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(depot_root).map_err(|source| DepotError::ListDir {
        path: depot_root.to_path_buf(),
        source,
    })?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DepotError::ListDir {
            path: depot_root.to_path_buf(),
            source,
        })?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
    }
    Ok(ids)
}
