//! Registry mapping a `RootFSPath` URL scheme to the provider responsible
//! for turning it into a mount point for one container.
mod directory;

pub use directory::DirectoryProvider;

use std::collections::HashMap;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum RootfsError {
    #[error("parsing rootfs path {0:?}: {1}")]
    Url(String, #[source] url::ParseError),
    #[error("unknown rootfs provider {0:?}")]
    UnknownProvider(String),
    #[error("providing rootfs for {id}: {source}")]
    Provide {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("cleaning up rootfs for {id}: {source}")]
    Cleanup {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

type Result<T> = std::result::Result<T, RootfsError>;

/// The outcome of [`RootFsProvider::provide`]: where the rootfs landed, and
/// any environment entries the provider wants overlaid onto the container's
/// environment (spec-provided keys still win on collision).
pub struct Provided {
    pub mount_path: String,
    pub env_overlay: Vec<String>,
}

/// A source of container root filesystems, keyed by `RootFSPath` URL scheme.
pub trait RootFsProvider: Send + Sync {
    fn provide(&self, id: &str, uri: &Url) -> Result<Provided>;
    /// Idempotent: called during `Destroy` and during `Prune` for containers
    /// whose in-memory record was lost.
    fn cleanup(&self, id: &str) -> Result<()>;
}

/// Maps scheme strings (the empty string is the default) to a provider.
#[derive(Default)]
pub struct RootFsRegistry {
    providers: HashMap<String, Box<dyn RootFsProvider>>,
}

impl RootFsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scheme: impl Into<String>, provider: Box<dyn RootFsProvider>) {
        self.providers.insert(scheme.into(), provider);
    }

    /// Parses `rootfs_path` as a URL (empty string selects the default
    /// scheme `""`) and looks up the provider registered for its scheme.
    pub fn resolve(&self, rootfs_path: &str) -> Result<(String, &dyn RootFsProvider)> {
        let scheme = if rootfs_path.is_empty() {
            String::new()
        } else {
            Url::parse(rootfs_path)
                .map_err(|e| RootfsError::Url(rootfs_path.to_string(), e))?
                .scheme()
                .to_string()
        };

        let provider = self
            .providers
            .get(&scheme)
            .ok_or_else(|| RootfsError::UnknownProvider(scheme.clone()))?;

        Ok((scheme, provider.as_ref()))
    }

    pub fn get(&self, scheme: &str) -> Option<&dyn RootFsProvider> {
        self.providers.get(scheme).map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_empty_path_selects_default_scheme() {
        let mut registry = RootFsRegistry::new();
        registry.register("", Box::new(DirectoryProvider::new()));
        let (scheme, _) = registry.resolve("").unwrap();
        assert_eq!(scheme, "");
    }

    #[test]
    fn resolve_unknown_scheme_errors() {
        let registry = RootFsRegistry::new();
        let err = registry.resolve("docker://busybox").unwrap_err();
        assert!(matches!(err, RootfsError::UnknownProvider(scheme) if scheme == "docker"));
    }

    #[test]
    fn resolve_unparseable_path_errors() {
        let registry = RootFsRegistry::new();
        let err = registry.resolve("this has no scheme at all").unwrap_err();
        assert!(matches!(err, RootfsError::Url(_, _)));
    }
}
