use url::Url;

use super::{Provided, Result, RootFsProvider};

/// The default (`""` scheme) rootfs provider: treats the URL path as an
/// already-prepared rootfs directory on the host. Performs no mounting —
/// it exists so `Create`/`Destroy` round-trip in tests and the demo binary
/// without host privileges.
#[derive(Debug, Default)]
pub struct DirectoryProvider;

impl DirectoryProvider {
    pub fn new() -> Self {
        Self
    }
}

impl RootFsProvider for DirectoryProvider {
    fn provide(&self, _id: &str, uri: &Url) -> Result<Provided> {
        Ok(Provided {
            mount_path: uri.path().to_string(),
            env_overlay: Vec::new(),
        })
    }

    fn cleanup(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}
