// SPDX-License-Identifier: AGPL-3.0-only

//! Linux sysfs backend
//!
//! Discovers CPU topology from `devices/system/cpu/cpuN/topology` and memory
//! nodes from `devices/system/node`, and exposes the cpufreq attributes:
//!
//! | Name | File | Kind |
//! |------|------|------|
//! | `CPU_FREQUENCY_STATUS` | `scaling_cur_freq` | signal |
//! | `CPU_FREQUENCY_MAX_AVAIL` | `cpuinfo_max_freq` | signal |
//! | `CPU_FREQUENCY_MIN_AVAIL` | `cpuinfo_min_freq` | signal |
//! | `CPU_FREQUENCY_MAX_CONTROL` | `scaling_max_freq` | control |
//! | `CPU_FREQUENCY_MIN_CONTROL` | `scaling_min_freq` | control |
//!
//! sysfs reports kHz; everything crossing the backend boundary is in Hz.
//! The root is configurable so the backend can run against a copied or
//! fabricated tree.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use platio_domain::{codes, is_nested, Aggregation, Behavior, DomainType, Format};
use tracing::{debug, info, warn};

use crate::backend::{BackendCode, BackendResult, BackendType, ControlSpec, PlatformBackend, SignalSpec};
use crate::error::{PioError, Result};
use crate::topology::TopologyTable;
use crate::validate::ValidatedRequest;

const KHZ: f64 = 1000.0;

/// cpufreq attribute behind each name, and whether it is writable
const ATTRIBUTES: &[(&str, &str, bool)] = &[
    ("CPU_FREQUENCY_STATUS", "scaling_cur_freq", false),
    ("CPU_FREQUENCY_MAX_AVAIL", "cpuinfo_max_freq", false),
    ("CPU_FREQUENCY_MIN_AVAIL", "cpuinfo_min_freq", false),
    ("CPU_FREQUENCY_MAX_CONTROL", "scaling_max_freq", true),
    ("CPU_FREQUENCY_MIN_CONTROL", "scaling_min_freq", true),
];

fn attribute(name: &str) -> Option<(&'static str, bool)> {
    ATTRIBUTES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, file, writable)| (file, writable))
}

/// Backend over a Linux sysfs tree
#[derive(Debug)]
pub struct SysfsBackend {
    root: PathBuf,
    /// Kernel CPU numbers, sorted; position is the logical CPU index
    cpus: Vec<u32>,
    table: TopologyTable,
    has_cpufreq: bool,
    saved: Mutex<Option<Vec<(usize, &'static str, String)>>>,
}

impl SysfsBackend {
    /// Open the sysfs tree under `root` (normally `/sys`)
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` with `ERROR_PLATFORM_UNSUPPORTED` if the
    /// tree has no CPU topology.
    pub fn init(root: &Path) -> Result<Self> {
        let (cpus, table) = discover(root).map_err(|code| {
            PioError::backend(
                "sysfs init",
                code.code(),
                format!("no CPU topology under {}", root.display()),
            )
        })?;
        let has_cpufreq = cpus
            .first()
            .is_some_and(|cpu| cpu_dir(root, *cpu).join("cpufreq").is_dir());

        info!(
            "sysfs backend: {} CPUs, cpufreq {}",
            cpus.len(),
            if has_cpufreq { "present" } else { "absent" }
        );
        Ok(Self {
            root: root.to_path_buf(),
            cpus,
            table,
            has_cpufreq,
            saved: Mutex::new(None),
        })
    }

    fn attribute_path(&self, cpu_index: usize, file: &str) -> BackendResult<PathBuf> {
        let cpu = self.cpus.get(cpu_index).ok_or(BackendCode::INVALID)?;
        Ok(cpu_dir(&self.root, *cpu).join("cpufreq").join(file))
    }

    fn cpus_in(&self, request: &ValidatedRequest) -> BackendResult<Vec<usize>> {
        if !is_nested(DomainType::Cpu, request.domain()) {
            return Err(BackendCode::INVALID);
        }
        Ok((0..self.table.count(DomainType::Cpu))
            .filter(|&c| {
                self.table.ancestor_index(DomainType::Cpu, c, request.domain()) == Some(request.index())
            })
            .collect())
    }

    fn read_khz(&self, cpu_index: usize, file: &str) -> BackendResult<f64> {
        let text = fs::read_to_string(self.attribute_path(cpu_index, file)?)
            .map_err(|_| BackendCode::READ)?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| BackendCode::new(codes::ERROR_FILE_PARSE))
    }

    fn write_raw(&self, cpu_index: usize, file: &str, text: &str) -> BackendResult<()> {
        fs::write(self.attribute_path(cpu_index, file)?, text).map_err(|e| {
            warn!("sysfs write {file} on cpu index {cpu_index}: {e}");
            BackendCode::WRITE
        })
    }
}

impl PlatformBackend for SysfsBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sysfs
    }

    fn discover_topology(&self) -> BackendResult<TopologyTable> {
        discover(&self.root).map(|(_, table)| table)
    }

    fn signal_specs(&self) -> BackendResult<Vec<SignalSpec>> {
        if !self.has_cpufreq {
            return Ok(Vec::new());
        }
        Ok(ATTRIBUTES
            .iter()
            .map(|&(name, file, _)| SignalSpec {
                name: name.to_string(),
                description: format!("cpufreq {file} (hertz)"),
                domain: DomainType::Cpu,
                aggregation: if name.ends_with("_AVAIL") {
                    Aggregation::ExpectSame
                } else {
                    Aggregation::Average
                },
                format: Format::Double,
                behavior: if name.ends_with("_AVAIL") {
                    Behavior::Constant
                } else {
                    Behavior::Variable
                },
            })
            .collect())
    }

    fn control_specs(&self) -> BackendResult<Vec<ControlSpec>> {
        if !self.has_cpufreq {
            return Ok(Vec::new());
        }
        Ok(ATTRIBUTES
            .iter()
            .filter(|(_, _, writable)| *writable)
            .map(|&(name, file, _)| ControlSpec {
                name: name.to_string(),
                description: format!("cpufreq {file} (hertz)"),
                domain: DomainType::Cpu,
            })
            .collect())
    }

    fn read_signal(&self, request: &ValidatedRequest) -> BackendResult<f64> {
        let (file, _) = attribute(request.name()).ok_or(BackendCode::INVALID)?;
        let samples = self
            .cpus_in(request)?
            .into_iter()
            .map(|c| self.read_khz(c, file).map(|khz| khz * KHZ))
            .collect::<BackendResult<Vec<f64>>>()?;
        let aggregation = if request.name().ends_with("_AVAIL") {
            Aggregation::ExpectSame
        } else {
            Aggregation::Average
        };
        Ok(aggregation.apply(&samples))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn write_control(&self, request: &ValidatedRequest, value: f64) -> BackendResult<()> {
        let (file, writable) = attribute(request.name()).ok_or(BackendCode::INVALID)?;
        if !writable || !value.is_finite() || value < 0.0 {
            return Err(BackendCode::INVALID);
        }
        let khz = format!("{}", (value / KHZ).round() as u64);
        for cpu in self.cpus_in(request)? {
            self.write_raw(cpu, file, &khz)?;
        }
        debug!("sysfs {file} = {khz} kHz for {request}");
        Ok(())
    }

    fn save_controls(&self) -> BackendResult<()> {
        if !self.has_cpufreq {
            return Err(BackendCode::NOT_IMPLEMENTED);
        }
        let mut snapshot = Vec::new();
        for cpu in 0..self.cpus.len() {
            for &(_, file, writable) in ATTRIBUTES {
                if writable {
                    let text = fs::read_to_string(self.attribute_path(cpu, file)?)
                        .map_err(|_| BackendCode::READ)?;
                    snapshot.push((cpu, file, text.trim().to_string()));
                }
            }
        }
        *self.saved.lock() = Some(snapshot);
        Ok(())
    }

    fn restore_controls(&self) -> BackendResult<()> {
        let saved = self.saved.lock().clone().ok_or(BackendCode::INVALID)?;
        for (cpu, file, text) in &saved {
            self.write_raw(*cpu, file, text)?;
        }
        Ok(())
    }
}

fn cpu_dir(root: &Path, cpu: u32) -> PathBuf {
    root.join("devices/system/cpu").join(format!("cpu{cpu}"))
}

fn read_id(path: &Path) -> BackendResult<u32> {
    fs::read_to_string(path)
        .map_err(|_| BackendCode::READ)?
        .trim()
        .parse()
        .map_err(|_| BackendCode::new(codes::ERROR_FILE_PARSE))
}

/// Numbered entries `<prefix>N` of `dir`, sorted by N
fn numbered_entries(dir: &Path, prefix: &str) -> Vec<u32> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut ids: Vec<u32> = entries
        .flatten()
        .filter_map(|e| {
            e.file_name()
                .to_str()?
                .strip_prefix(prefix)?
                .parse()
                .ok()
        })
        .collect();
    ids.sort_unstable();
    ids
}

/// CPU list and topology table from the tree under `root`
fn discover(root: &Path) -> BackendResult<(Vec<u32>, TopologyTable)> {
    let cpus: Vec<u32> = numbered_entries(&root.join("devices/system/cpu"), "cpu")
        .into_iter()
        .filter(|&cpu| cpu_dir(root, cpu).join("topology").is_dir())
        .collect();
    if cpus.is_empty() {
        return Err(BackendCode::PLATFORM_UNSUPPORTED);
    }

    let mut ids = Vec::with_capacity(cpus.len());
    for &cpu in &cpus {
        let topo = cpu_dir(root, cpu).join("topology");
        let package = read_id(&topo.join("physical_package_id"))?;
        let core = read_id(&topo.join("core_id"))?;
        ids.push((package, core));
    }

    let packages: Vec<u32> = ids.iter().map(|&(p, _)| p).collect::<BTreeSet<_>>().into_iter().collect();
    let cores: Vec<(u32, u32)> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    let package_of = |p: u32| packages.binary_search(&p).unwrap_or_default();
    let core_of = |c: (u32, u32)| cores.binary_search(&c).unwrap_or_default();

    let nodes = numbered_entries(&root.join("devices/system/node"), "node");

    let table = TopologyTable::new()
        .with_domain(DomainType::Package, vec![0; packages.len()])
        .with_domain(DomainType::Core, cores.iter().map(|&(p, _)| package_of(p)).collect())
        .with_domain(DomainType::Cpu, ids.iter().map(|&c| core_of(c)).collect())
        .with_domain(DomainType::Memory, vec![0; nodes.len()]);

    debug!(
        "sysfs topology: {} packages, {} cores, {} cpus, {} memory nodes",
        packages.len(),
        cores.len(),
        cpus.len(),
        nodes.len()
    );
    Ok((cpus, table))
}
