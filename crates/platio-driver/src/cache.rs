//! Persisted topology cache
//!
//! Topology discovery is comparatively slow, so the discovered
//! [`TopologyTable`] is written to a well-known file and reused by every
//! process on the node until the next boot.
//!
//! A cache file is valid only if:
//! - its permission bits are exactly `0644`, and
//! - it was modified at or after the last system boot.
//!
//! The header also names the backend that discovered the table; a cache
//! written by another backend (e.g. a software dry run) is treated as
//! corrupt and regenerated.
//!
//! Anything else is regenerated. Files are written to a temporary file in
//! the same directory and renamed into place, so concurrent creators race
//! harmlessly and a reader never observes a partial file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use platio_domain::codes;
use rustix::fs::Mode;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::backend::{check, BackendType, PlatformBackend};
use crate::error::{PioError, Result};
use crate::topology::TopologyTable;

/// Default cache location
pub const DEFAULT_CACHE_PATH: &str = "/run/platio/topo-cache";

/// Required permission bits (`-rw-r--r--`)
pub const CACHE_MODE: u32 = 0o644;

const CACHE_FORMAT: &str = "platio-topo-cache";
const CACHE_VERSION: u32 = 2;

/// On-disk layout; self-describing so a version change is detected
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format: String,
    version: u32,
    /// Backend that discovered `table`
    backend: String,
    table: TopologyTable,
}

/// State of the cache file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Present, 0644, newer than the last boot
    Valid,
    /// No file at the cache path
    Missing,
    /// Older than the last boot (or boot time unknown)
    Stale,
    /// Permission bits other than 0644
    BadPermissions {
        /// Observed permission bits
        mode: u32,
    },
}

/// Topology cache manager
#[derive(Debug, Clone)]
pub struct TopologyCache {
    path: PathBuf,
    boot_time: Option<SystemTime>,
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH)
    }
}

impl TopologyCache {
    /// Cache manager for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            boot_time: None,
        }
    }

    /// Use a fixed boot time instead of reading `/proc/stat`
    #[must_use]
    pub fn with_boot_time(mut self, boot_time: SystemTime) -> Self {
        self.boot_time = Some(boot_time);
        self
    }

    /// Cache file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inspect the cache file without reading its contents
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but its metadata cannot be read.
    pub fn status(&self) -> Result<CacheStatus> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheStatus::Missing),
            Err(e) => return Err(e.into()),
        };

        let mode = meta.permissions().mode() & 0o777;
        if mode != CACHE_MODE {
            return Ok(CacheStatus::BadPermissions { mode });
        }

        let Some(boot) = self.boot_time.or_else(read_boot_time) else {
            debug!("Boot time unknown, treating {} as stale", self.path.display());
            return Ok(CacheStatus::Stale);
        };
        if meta.modified()? < boot {
            return Ok(CacheStatus::Stale);
        }

        Ok(CacheStatus::Valid)
    }

    /// Make sure a valid cache file exists, creating it if necessary
    ///
    /// Does no discovery if a valid cache is already present. A corrupt
    /// cache is regenerated once.
    ///
    /// # Errors
    ///
    /// Returns error if discovery fails, the file cannot be written, or the
    /// regenerated cache is still unreadable.
    pub fn ensure_cache(&self, backend: &dyn PlatformBackend) -> Result<()> {
        let producer = backend.backend_type();
        if self.status()? == CacheStatus::Valid {
            match self.load_for(producer) {
                Ok(_) => return Ok(()),
                Err(e @ PioError::CacheCorrupt { .. }) => {
                    warn!("{e}; regenerating");
                }
                Err(e) => return Err(e),
            }
        }
        let table = self.discover(backend)?;
        self.write(producer, &table)?;
        self.load_for(producer).map(|_| ())
    }

    /// Load the table from a valid cache, or discover it
    ///
    /// Unlike [`Self::ensure_cache`], failure to write the new cache file is
    /// not fatal here: the discovered table is logged and returned, so
    /// unprivileged callers still get a topology.
    ///
    /// # Errors
    ///
    /// Returns error if discovery fails or the cache stays corrupt after one
    /// regeneration.
    pub fn load_or_discover(&self, backend: &dyn PlatformBackend) -> Result<TopologyTable> {
        let status = self.status().unwrap_or_else(|e| {
            warn!("Cannot stat {}: {e}", self.path.display());
            CacheStatus::Missing
        });

        let producer = backend.backend_type();
        if status == CacheStatus::Valid {
            match self.load_for(producer) {
                Ok(table) => return Ok(table),
                Err(e @ PioError::CacheCorrupt { .. }) => warn!("{e}; regenerating"),
                Err(e) => return Err(e),
            }
        } else {
            debug!("Topology cache {} is {status:?}", self.path.display());
        }

        let table = self.discover(backend)?;
        match self.write(producer, &table) {
            Ok(()) => self.load_for(producer),
            Err(e) => {
                warn!(
                    "Cannot write topology cache {}: {e}; using discovered topology",
                    self.path.display()
                );
                Ok(table)
            }
        }
    }

    /// Read and check the cache file, whichever backend wrote it
    ///
    /// # Errors
    ///
    /// Returns `CacheCorrupt` if the contents cannot be parsed, carry the
    /// wrong format or version, or describe an inconsistent table.
    pub fn load(&self) -> Result<TopologyTable> {
        self.read_file().map(|file| file.table)
    }

    /// Like [`Self::load`], but only accept a table discovered by `backend`
    ///
    /// # Errors
    ///
    /// Returns `CacheCorrupt` as for [`Self::load`], or if another backend
    /// wrote the cache.
    pub fn load_for(&self, backend: BackendType) -> Result<TopologyTable> {
        let file = self.read_file()?;
        if file.backend != backend.name() {
            return Err(PioError::cache_corrupt(
                &self.path,
                format!(
                    "written by the {} backend, expected {}",
                    file.backend,
                    backend.name()
                ),
            ));
        }
        Ok(file.table)
    }

    fn read_file(&self) -> Result<CacheFile> {
        let text = fs::read_to_string(&self.path)?;
        let file: CacheFile = serde_json::from_str(&text)
            .map_err(|e| PioError::cache_corrupt(&self.path, e.to_string()))?;

        if file.format != CACHE_FORMAT {
            return Err(PioError::cache_corrupt(
                &self.path,
                format!("unexpected format {:?}", file.format),
            ));
        }
        if file.version != CACHE_VERSION {
            return Err(PioError::cache_corrupt(
                &self.path,
                format!("version {}, expected {CACHE_VERSION}", file.version),
            ));
        }
        file.table
            .validate()
            .map_err(|reason| PioError::cache_corrupt(&self.path, reason))?;

        Ok(file)
    }

    /// Atomically replace the cache file with `table`, as discovered by
    /// `backend`
    ///
    /// # Errors
    ///
    /// Returns error if the directory, temporary file or rename fails.
    pub fn write(&self, backend: BackendType, table: &TopologyTable) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let file = CacheFile {
            format: CACHE_FORMAT.to_string(),
            version: CACHE_VERSION,
            backend: backend.name().to_string(),
            table: table.clone(),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &file).map_err(std::io::Error::from)?;
        tmp.write_all(b"\n")?;
        // NamedTempFile is created 0600; the mode must not depend on umask.
        rustix::fs::fchmod(tmp.as_file(), Mode::from_raw_mode(CACHE_MODE))
            .map_err(std::io::Error::from)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!("Wrote topology cache {}", self.path.display());
        Ok(())
    }

    /// Remove the cache file so the next query regenerates it
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed.
    pub fn invalidate(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn discover(&self, backend: &dyn PlatformBackend) -> Result<TopologyTable> {
        info!("Discovering topology with {} backend", backend.backend_type());
        let table = check(backend, "discover_topology", backend.discover_topology())?;
        table.validate().map_err(|reason| {
            PioError::backend(
                "discover_topology",
                codes::ERROR_LOGIC,
                format!("backend returned an inconsistent topology: {reason}"),
            )
        })?;
        Ok(table)
    }
}

/// Last boot time from the `btime` line of `/proc/stat`
fn read_boot_time() -> Option<SystemTime> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    parse_btime(&stat)
}

fn parse_btime(stat: &str) -> Option<SystemTime> {
    let secs = stat
        .lines()
        .find_map(|line| line.strip_prefix("btime"))?
        .trim()
        .parse::<u64>()
        .ok()?;
    UNIX_EPOCH.checked_add(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareBackend;
    use tempfile::TempDir;

    fn boot_in_past() -> SystemTime {
        SystemTime::now() - Duration::from_secs(3600)
    }

    fn cache_in(dir: &TempDir) -> TopologyCache {
        TopologyCache::new(dir.path().join("run/topo-cache")).with_boot_time(boot_in_past())
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn missing_cache_is_created_with_0644() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let backend = SoftwareBackend::default_platform();

        assert_eq!(cache.status().unwrap(), CacheStatus::Missing);
        cache.ensure_cache(&backend).unwrap();

        assert_eq!(cache.status().unwrap(), CacheStatus::Valid);
        assert_eq!(mode_of(cache.path()), 0o644);
        assert_eq!(backend.discovery_count(), 1);
    }

    #[test]
    fn ensure_cache_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let backend = SoftwareBackend::default_platform();

        cache.ensure_cache(&backend).unwrap();
        cache.ensure_cache(&backend).unwrap();
        assert_eq!(backend.discovery_count(), 1);
    }

    #[test]
    fn wrong_permissions_force_regeneration() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let backend = SoftwareBackend::default_platform();
        cache.ensure_cache(&backend).unwrap();

        fs::set_permissions(cache.path(), fs::Permissions::from_mode(0o600)).unwrap();
        assert_eq!(cache.status().unwrap(), CacheStatus::BadPermissions { mode: 0o600 });

        cache.ensure_cache(&backend).unwrap();
        assert_eq!(mode_of(cache.path()), 0o644);
        assert_eq!(backend.discovery_count(), 2);
    }

    #[test]
    fn cache_older_than_boot_is_stale() {
        let dir = TempDir::new().unwrap();
        let backend = SoftwareBackend::default_platform();
        cache_in(&dir).ensure_cache(&backend).unwrap();

        let future_boot = SystemTime::now() + Duration::from_secs(3600);
        let rebooted = TopologyCache::new(dir.path().join("run/topo-cache")).with_boot_time(future_boot);
        assert_eq!(rebooted.status().unwrap(), CacheStatus::Stale);
    }

    #[test]
    fn corrupt_cache_is_regenerated_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let backend = SoftwareBackend::default_platform();
        cache.ensure_cache(&backend).unwrap();

        fs::write(cache.path(), "{ not json").unwrap();
        assert!(matches!(cache.load(), Err(PioError::CacheCorrupt { .. })));

        let table = cache.load_or_discover(&backend).unwrap();
        assert_eq!(table, backend.discover_topology().unwrap());
        assert!(cache.load().is_ok());
    }

    #[test]
    fn version_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache
            .write(BackendType::Software, &TopologyTable::uniform(1, 1, 1))
            .unwrap();

        let text = fs::read_to_string(cache.path()).unwrap();
        fs::write(cache.path(), text.replace("\"version\": 2", "\"version\": 99")).unwrap();

        let err = cache.load().unwrap_err();
        assert!(err.to_string().contains("version 99"), "{err}");
    }

    #[test]
    fn invalidate_removes_file() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.write(BackendType::Sysfs, &TopologyTable::new()).unwrap();
        cache.invalidate().unwrap();
        assert_eq!(cache.status().unwrap(), CacheStatus::Missing);
        cache.invalidate().unwrap();
    }

    #[test]
    fn unwritable_cache_still_yields_topology() {
        let dir = TempDir::new().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("run");
        fs::write(&blocker, "").unwrap();
        let cache = TopologyCache::new(blocker.join("topo-cache")).with_boot_time(boot_in_past());
        let backend = SoftwareBackend::default_platform();

        let table = cache.load_or_discover(&backend).unwrap();
        assert_eq!(table.count(platio_domain::DomainType::Board), 1);
        assert!(cache.ensure_cache(&backend).is_err());
    }

    #[test]
    fn cache_from_other_backend_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache
            .write(BackendType::Sysfs, &TopologyTable::uniform(1, 1, 1))
            .unwrap();
        assert_eq!(cache.status().unwrap(), CacheStatus::Valid);
        assert!(cache.load().is_ok());
        assert!(matches!(
            cache.load_for(BackendType::Software),
            Err(PioError::CacheCorrupt { .. })
        ));

        let backend = SoftwareBackend::default_platform();
        let table = cache.load_or_discover(&backend).unwrap();
        assert_eq!(table.count(platio_domain::DomainType::Cpu), 16);
        assert_eq!(backend.discovery_count(), 1);
        assert!(cache.load_for(BackendType::Software).is_ok());

        cache.ensure_cache(&backend).unwrap();
        assert_eq!(backend.discovery_count(), 1);
    }

    #[test]
    fn btime_parsing() {
        let stat = "cpu  1 2 3\nintr 5\nbtime 1700000000\nprocesses 9\n";
        assert_eq!(
            parse_btime(stat),
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
        assert_eq!(parse_btime("cpu 1 2 3\n"), None);
    }
}
