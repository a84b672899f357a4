//! Runtime configuration
//!
//! Defaults suit a production node. Each field can be overridden from the
//! environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `PLATIO_TOPO_CACHE` | `cache_path` | `/run/platio/topo-cache` |
//! | `PLATIO_BACKEND` | `backend` | `auto` |
//! | `PLATIO_SYSFS_ROOT` | `sysfs_root` | `/sys` |

use std::path::PathBuf;

use tracing::warn;

use crate::backend::BackendSelection;
use crate::cache::DEFAULT_CACHE_PATH;

/// Environment variable overriding the topology cache path
pub const ENV_TOPO_CACHE: &str = "PLATIO_TOPO_CACHE";
/// Environment variable selecting the backend
pub const ENV_BACKEND: &str = "PLATIO_BACKEND";
/// Environment variable overriding the sysfs root
pub const ENV_SYSFS_ROOT: &str = "PLATIO_SYSFS_ROOT";

/// Platform I/O configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PioConfig {
    /// Topology cache file
    pub cache_path: PathBuf,
    /// Backend selection strategy
    pub backend: BackendSelection,
    /// Root of the sysfs tree used by the sysfs backend
    pub sysfs_root: PathBuf,
}

impl Default for PioConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            backend: BackendSelection::Auto,
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl PioConfig {
    /// Defaults overridden by `PLATIO_*` environment variables
    ///
    /// An unparseable `PLATIO_BACKEND` is logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_TOPO_CACHE).filter(|v| !v.is_empty()) {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(root) = lookup(ENV_SYSFS_ROOT).filter(|v| !v.is_empty()) {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(value) = lookup(ENV_BACKEND) {
            match value.parse() {
                Ok(selection) => config.backend = selection,
                Err(e) => warn!("Ignoring {ENV_BACKEND}: {e}"),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = PioConfig::from_lookup(lookup(&[]));
        assert_eq!(c, PioConfig::default());
        assert_eq!(c.cache_path, PathBuf::from("/run/platio/topo-cache"));
    }

    #[test]
    fn env_overrides() {
        let c = PioConfig::from_lookup(lookup(&[
            (ENV_TOPO_CACHE, "/tmp/cache"),
            (ENV_BACKEND, "software"),
            (ENV_SYSFS_ROOT, "/tmp/sys"),
        ]));
        assert_eq!(c.cache_path, PathBuf::from("/tmp/cache"));
        assert_eq!(c.backend, BackendSelection::Software);
        assert_eq!(c.sysfs_root, PathBuf::from("/tmp/sys"));
    }

    #[test]
    fn bad_backend_is_ignored() {
        let c = PioConfig::from_lookup(lookup(&[(ENV_BACKEND, "msr")]));
        assert_eq!(c.backend, BackendSelection::Auto);
    }
}
