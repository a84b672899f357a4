//! Topology cache tests
//!
//! Exercises the cache through the public API: creation, permission repair,
//! staleness, and concurrent creators.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use platio_driver::{
    select_backend, BackendSelection, BackendType, CacheStatus, PioConfig, PioError,
    PlatformBackend, PlatformIo, SoftwareBackend, SysfsBackend, TopologyCache,
};
use tempfile::TempDir;

fn cache_at(dir: &TempDir) -> TopologyCache {
    TopologyCache::new(dir.path().join("platio/topo-cache"))
        .with_boot_time(SystemTime::now() - Duration::from_secs(600))
}

fn mode(cache: &TopologyCache) -> u32 {
    fs::metadata(cache.path()).unwrap().permissions().mode() & 0o777
}

#[test]
fn test_cache_with_0600_is_regenerated_0644() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let backend = SoftwareBackend::default_platform();

    cache.ensure_cache(&backend).unwrap();
    fs::set_permissions(cache.path(), fs::Permissions::from_mode(0o600)).unwrap();

    cache.ensure_cache(&backend).unwrap();
    assert_eq!(mode(&cache), 0o644);
    assert_eq!(cache.status().unwrap(), CacheStatus::Valid);
}

#[test]
fn test_ensure_cache_twice_discovers_once() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let backend = SoftwareBackend::default_platform();

    cache.ensure_cache(&backend).unwrap();
    cache.ensure_cache(&backend).unwrap();
    assert_eq!(backend.discovery_count(), 1);
}

#[test]
fn test_unknown_domain_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let backend = Arc::new(SoftwareBackend::default_platform());
    let pio = PlatformIo::init(backend.clone(), cache.clone()).unwrap();

    let err = pio.topology().num_domain("nonexistent_domain").unwrap_err();
    assert!(matches!(err, PioError::UnknownDomainName { .. }));
    assert!(!cache.path().exists());
    assert_eq!(backend.discovery_count(), 0);
}

#[test]
fn test_query_creates_cache_then_reuses_it() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    let backend = Arc::new(SoftwareBackend::default_platform());

    let first = PlatformIo::init(backend.clone(), cache.clone()).unwrap();
    assert_eq!(first.topology().num_domain("package").unwrap(), 2);
    assert_eq!(mode(&cache), 0o644);

    // A second context (another process, in practice) reads the file
    let second = PlatformIo::init(backend.clone(), cache.clone()).unwrap();
    assert_eq!(second.topology().num_domain("cpu").unwrap(), 16);
    assert_eq!(backend.discovery_count(), 1);
}

#[test]
fn test_reboot_invalidates_cache() {
    let dir = TempDir::new().unwrap();
    let backend = SoftwareBackend::default_platform();
    cache_at(&dir).ensure_cache(&backend).unwrap();

    let after_reboot = TopologyCache::new(dir.path().join("platio/topo-cache"))
        .with_boot_time(SystemTime::now() + Duration::from_secs(600));
    assert_eq!(after_reboot.status().unwrap(), CacheStatus::Stale);
    after_reboot.ensure_cache(&backend).unwrap();
    assert_eq!(backend.discovery_count(), 2);
}

#[test]
fn test_concurrent_creators() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("platio/topo-cache");
    let backend = Arc::new(SoftwareBackend::default_platform());

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let cache = TopologyCache::new(path)
                    .with_boot_time(SystemTime::now() - Duration::from_secs(600));
                cache.ensure_cache(backend.as_ref())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked").expect("ensure_cache failed");
    }

    let cache = cache_at(&dir);
    assert_eq!(cache.status().unwrap(), CacheStatus::Valid);
    assert_eq!(cache.load().unwrap(), backend.discover_topology().unwrap());
    let leftovers = fs::read_dir(dir.path().join("platio")).unwrap().count();
    assert_eq!(leftovers, 1, "temporary files left behind");
}

#[test]
fn test_config_selects_software_backend() {
    let dir = TempDir::new().unwrap();
    let config = PioConfig {
        cache_path: dir.path().join("topo-cache"),
        backend: BackendSelection::Software,
        sysfs_root: dir.path().join("sys"),
    };
    let pio = PlatformIo::from_config(&config).unwrap();
    assert_eq!(pio.topology().num_domain("memory").unwrap(), 2);
    assert!(config.cache_path.exists());

    // No sysfs tree under the root: auto falls back, forced sysfs fails
    assert!(select_backend(BackendSelection::Auto, &config).is_ok());
    assert!(select_backend(BackendSelection::Sysfs, &config).is_err());
}

/// A sysfs tree with a single CPU and no cpufreq
fn one_cpu_sysfs(dir: &TempDir) -> std::path::PathBuf {
    let root = dir.path().join("sys");
    let topo = root.join("devices/system/cpu/cpu0/topology");
    fs::create_dir_all(&topo).unwrap();
    fs::write(topo.join("physical_package_id"), "0\n").unwrap();
    fs::write(topo.join("core_id"), "0\n").unwrap();
    root
}

#[test]
fn test_dry_run_cache_is_not_reused_by_sysfs() {
    let dir = TempDir::new().unwrap();
    let cache = cache_at(&dir);
    cache.ensure_cache(&SoftwareBackend::default_platform()).unwrap();

    let sysfs = Arc::new(SysfsBackend::init(&one_cpu_sysfs(&dir)).unwrap());
    assert_eq!(sysfs.backend_type(), BackendType::Sysfs);
    let pio = PlatformIo::init(sysfs, cache.clone()).unwrap();
    assert_eq!(pio.topology().num_domain("cpu").unwrap(), 1);
    assert_eq!(pio.topology().num_domain("package").unwrap(), 1);
    assert!(cache.load_for(BackendType::Sysfs).is_ok());
    assert_eq!(mode(&cache), 0o644);

    // and the other way round
    let software = Arc::new(SoftwareBackend::default_platform());
    let pio = PlatformIo::init(software.clone(), cache.clone()).unwrap();
    assert_eq!(pio.topology().num_domain("cpu").unwrap(), 16);
    assert_eq!(software.discovery_count(), 1);
}

#[test]
#[ignore] // Requires a Linux host with cpufreq
fn test_host_sysfs_topology() {
    let backend = select_backend(BackendSelection::Sysfs, &PioConfig::default())
        .expect("sysfs backend init");
    let dir = TempDir::new().unwrap();
    let pio = PlatformIo::init(backend, cache_at(&dir)).expect("init");
    let cpus = pio.topology().num_domain("cpu").unwrap();
    println!("Host: {cpus} CPUs");
    assert!(cpus > 0);
}
