//! In-memory registry of live containers, layered over [`crate::pool::ContainerPool`].
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::container::{Container, ContainerSpec};
use crate::error::{LibpoolError, Result};
use crate::pool::ContainerPool;

pub struct Capacity {
    pub memory_in_bytes: u64,
    pub disk_in_bytes: u64,
    pub max_containers: usize,
}

/// Holds `handle -> Container`, guarded by a readers-writer lock held only
/// around the map operation itself, never across a long-running pool call.
pub struct BackendRegistry {
    pool: ContainerPool,
    snapshots_dir: PathBuf,
    containers: RwLock<HashMap<String, Container>>,
}

impl BackendRegistry {
    pub fn new(pool: ContainerPool, snapshots_dir: PathBuf) -> Self {
        Self {
            pool,
            snapshots_dir,
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Restores any persisted snapshots, then prunes the depot of whatever
    /// isn't among the restored containers.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        if self.snapshots_dir.is_dir() {
            let entries = fs::read_dir(&self.snapshots_dir).map_err(|source| {
                LibpoolError::SnapshotRead {
                    path: self.snapshots_dir.clone(),
                    source,
                }
            })?;

            let mut restored = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| LibpoolError::SnapshotRead {
                    path: self.snapshots_dir.clone(),
                    source,
                })?;
                let file = fs::File::open(entry.path()).map_err(|source| LibpoolError::SnapshotRead {
                    path: entry.path(),
                    source,
                })?;
                match self.pool.restore(file) {
                    Ok(container) => restored.push(container),
                    Err(err) => {
                        tracing::warn!(path = ?entry.path(), error = %err, "failed to restore snapshot, skipping");
                    }
                }
            }

            {
                let mut containers = self.containers.write().unwrap();
                for container in restored {
                    containers.insert(container.handle.clone(), container);
                }
            }

            let _ = fs::remove_dir_all(&self.snapshots_dir);
            fs::create_dir_all(&self.snapshots_dir).map_err(|source| LibpoolError::SnapshotRead {
                path: self.snapshots_dir.clone(),
                source,
            })?;
        }

        let keep: HashSet<String> = self
            .containers
            .read()
            .unwrap()
            .values()
            .map(|c| c.id.clone())
            .collect();
        self.pool.prune(&keep)?;

        Ok(())
    }

    #[tracing::instrument(skip(self, spec))]
    pub fn create(&self, spec: &ContainerSpec) -> Result<Container> {
        if !spec.handle.is_empty() && self.containers.read().unwrap().contains_key(&spec.handle) {
            return Err(LibpoolError::HandleExists {
                handle: spec.handle.clone(),
            });
        }

        let mut container = self.pool.create(spec)?;
        container.add_event("active");
        container.set_status(crate::container::ContainerStatus::Active);

        let handle = container.handle.clone();
        self.containers.write().unwrap().insert(handle, container.clone());
        Ok(container)
    }

    #[tracing::instrument(skip(self))]
    pub fn destroy(&self, handle: &str) -> Result<()> {
        let container = self
            .containers
            .read()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| LibpoolError::ContainerNotFound {
                handle: handle.to_string(),
            })?;

        self.pool.destroy(&container)?;
        self.containers.write().unwrap().remove(handle);
        Ok(())
    }

    /// Returns every container whose properties are a superset of `filter`.
    pub fn containers(&self, filter: &BTreeMap<String, String>) -> Vec<Container> {
        self.containers
            .read()
            .unwrap()
            .values()
            .filter(|c| c.matches(filter))
            .cloned()
            .collect()
    }

    pub fn lookup(&self, handle: &str) -> Result<Container> {
        self.containers
            .read()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| LibpoolError::ContainerNotFound {
                handle: handle.to_string(),
            })
    }

    pub fn grace_time(&self, container: &Container) -> std::time::Duration {
        container.grace_time
    }

    pub fn capacity(&self, memory_in_bytes: u64, disk_in_bytes: u64) -> Capacity {
        Capacity {
            memory_in_bytes,
            disk_in_bytes,
            max_containers: self.pool.max_containers(),
        }
    }

    /// Snapshots every container to `<snapshots_dir>/<id>`, logging and
    /// continuing past individual failures.
    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        let containers = self.containers.read().unwrap();
        for container in containers.values() {
            let snapshot = crate::container::Snapshot::from(container);
            let path = self.snapshots_dir.join(&container.id);
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(bytes) => {
                    if let Err(err) = fs::write(&path, bytes) {
                        tracing::warn!(id = %container.id, error = %err, "failed to write snapshot, continuing");
                    }
                }
                Err(err) => {
                    tracing::warn!(id = %container.id, error = %err, "failed to encode snapshot, continuing");
                }
            }
        }
    }
}
