// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual platform) backend
//!
//! Implements the `PlatformBackend` trait over an in-memory value store.
//! This enables:
//!
//! 1. **CI without hardware**: every core path (discovery, validation,
//!    batching, commit failures) runs without privileges or real registers.
//!
//! 2. **Dry runs**: `platio --backend software` shows what a batch would
//!    write without touching the machine.
//!
//! 3. **Failure injection**: individual control targets can be made to fail
//!    so partial-commit handling can be exercised deterministically.
//!
//! ## Value model
//!
//! Each signal and control holds one value per instance of its native
//! domain. A read at a coarser domain combines the nested native values with
//! the signal's aggregation; a write at a coarser domain sets every nested
//! native instance. Requests at a finer domain than native are rejected with
//! `ERROR_INVALID`.
//!
//! Every control is also readable as a signal of the same name, reporting
//! its current setting.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use platio_domain::{is_nested, Aggregation, Behavior, DomainType, Format};
use tracing::{debug, info};

use crate::backend::{
    BackendCode, BackendResult, BackendType, ControlSpec, ControlWrite, PlatformBackend,
    SignalSpec,
};
use crate::topology::TopologyTable;
use crate::validate::ValidatedRequest;

/// Seconds since the backend was created
pub const TIME_SIGNAL: &str = "TIME";

/// One control write that reached the software backend
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Control name
    pub name: String,
    /// Domain the write was addressed to
    pub domain: DomainType,
    /// Domain index the write was addressed to
    pub index: usize,
    /// Value written
    pub value: f64,
}

#[derive(Debug, Default)]
struct State {
    /// Value per (name, native domain index)
    values: HashMap<(String, usize), f64>,
    writes: Vec<WriteRecord>,
    saved: Option<HashMap<(String, usize), f64>>,
    /// (control name, addressed index) pairs whose writes fail
    failing_writes: HashSet<(String, usize)>,
    /// Names whose reads fail
    failing_reads: HashSet<String>,
    fail_reads: bool,
}

/// Software (virtual platform) backend.
///
/// Topology, catalogue and initial values are fixed at construction; only
/// the values change afterwards.
#[derive(Debug)]
pub struct SoftwareBackend {
    table: TopologyTable,
    signals: Vec<SignalSpec>,
    controls: Vec<ControlSpec>,
    state: Mutex<State>,
    discoveries: AtomicUsize,
    started: Instant,
}

impl SoftwareBackend {
    /// Create a backend over `table` with an empty catalogue.
    pub fn new(table: TopologyTable) -> Self {
        Self {
            table,
            signals: Vec::new(),
            controls: Vec::new(),
            state: Mutex::new(State::default()),
            discoveries: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Add a signal whose every native instance starts at `initial`.
    #[must_use]
    pub fn with_signal(mut self, spec: SignalSpec, initial: f64) -> Self {
        self.fill(&spec.name, spec.domain, initial);
        self.signals.push(spec);
        self
    }

    /// Add a control whose every native instance starts at `initial`.
    #[must_use]
    pub fn with_control(mut self, spec: ControlSpec, initial: f64) -> Self {
        self.fill(&spec.name, spec.domain, initial);
        self.controls.push(spec);
        self
    }

    /// A two-socket node: 2 packages × 4 cores × 2 hardware threads, with
    /// two memory nodes and a small frequency / power catalogue.
    pub fn default_platform() -> Self {
        let table = TopologyTable::uniform(2, 4, 2).with_domain(DomainType::Memory, vec![0, 0]);
        Self::new(table)
            .with_signal(
                signal(TIME_SIGNAL, "Time elapsed since the platform was opened", DomainType::Board)
                    .aggregate(Aggregation::SelectFirst)
                    .behave(Behavior::Monotone),
                0.0,
            )
            .with_signal(
                signal("CPU_ENERGY", "Package energy consumed (joules)", DomainType::Package)
                    .aggregate(Aggregation::Sum)
                    .behave(Behavior::Monotone),
                1000.0,
            )
            .with_signal(
                signal("CPU_POWER", "Package power (watts)", DomainType::Package)
                    .aggregate(Aggregation::Sum),
                95.0,
            )
            .with_signal(
                signal("CPU_FREQUENCY_STATUS", "Current operating frequency (hertz)", DomainType::Cpu),
                2.0e9,
            )
            .with_signal(
                signal("CPU_FREQUENCY_MAX_AVAIL", "Highest available frequency (hertz)", DomainType::Cpu)
                    .aggregate(Aggregation::ExpectSame)
                    .behave(Behavior::Constant),
                3.7e9,
            )
            .with_signal(
                signal("CPU_CORE_TEMPERATURE", "Core temperature (celsius)", DomainType::Core)
                    .aggregate(Aggregation::Max)
                    .print(Format::Integer),
                45.0,
            )
            .with_control(
                control("POWER_LIMIT", "Package power limit (watts)", DomainType::Package),
                200.0,
            )
            .with_control(
                control(
                    "CPU_FREQUENCY_MAX_CONTROL",
                    "Upper frequency limit (hertz)",
                    DomainType::Cpu,
                ),
                3.7e9,
            )
            .with_control(
                control(
                    "CPU_FREQUENCY_MIN_CONTROL",
                    "Lower frequency limit (hertz)",
                    DomainType::Cpu,
                ),
                1.0e9,
            )
    }

    /// Number of `discover_topology` calls so far
    pub fn discovery_count(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    /// Every write applied so far, in order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Make writes of `name` addressed to domain index `index` fail with
    /// `ERROR_MSR_WRITE`
    pub fn fail_writes_to(&self, name: &str, index: usize) {
        self.state
            .lock()
            .failing_writes
            .insert((name.to_string(), index));
    }

    /// Let every write succeed again
    pub fn clear_write_failures(&self) {
        self.state.lock().failing_writes.clear();
    }

    /// Make every read fail with `ERROR_MSR_READ`
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make every read of `name` fail with `ERROR_MSR_READ`
    pub fn fail_reads_of(&self, name: &str) {
        self.state.lock().failing_reads.insert(name.to_string());
    }

    /// Set the native-domain value of a signal or control directly
    pub fn set_signal(&self, name: &str, index: usize, value: f64) {
        self.state.lock().values.insert((name.to_string(), index), value);
    }

    /// Current native-domain value of a signal or control
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.state.lock().values.get(&(name.to_string(), index)).copied()
    }

    fn fill(&self, name: &str, domain: DomainType, initial: f64) {
        let mut state = self.state.lock();
        for i in 0..self.table.count(domain) {
            state.values.insert((name.to_string(), i), initial);
        }
    }

    /// Native instances of `native` covered by instance `index` of `domain`
    fn native_instances(&self, native: DomainType, domain: DomainType, index: usize) -> BackendResult<Vec<usize>> {
        if !is_nested(native, domain) {
            return Err(BackendCode::INVALID);
        }
        Ok((0..self.table.count(native))
            .filter(|&i| self.table.ancestor_index(native, i, domain) == Some(index))
            .collect())
    }

    fn readable(&self, name: &str) -> Option<(DomainType, Aggregation)> {
        if let Some(s) = self.signals.iter().find(|s| s.name == name) {
            return Some((s.domain, s.aggregation));
        }
        self.controls
            .iter()
            .find(|c| c.name == name)
            .map(|c| (c.domain, Aggregation::Average))
    }

    fn read_locked(&self, state: &State, request: &ValidatedRequest) -> BackendResult<f64> {
        if state.fail_reads || state.failing_reads.contains(request.name()) {
            return Err(BackendCode::READ);
        }
        if request.name() == TIME_SIGNAL {
            return Ok(self.started.elapsed().as_secs_f64());
        }
        let (native, aggregation) = self.readable(request.name()).ok_or(BackendCode::INVALID)?;
        let samples: Vec<f64> = self
            .native_instances(native, request.domain(), request.index())?
            .into_iter()
            .filter_map(|i| state.values.get(&(request.name().to_string(), i)).copied())
            .collect();
        Ok(aggregation.apply(&samples))
    }

    fn write_locked(&self, state: &mut State, request: &ValidatedRequest, value: f64) -> BackendResult<()> {
        let target = (request.name().to_string(), request.index());
        if state.failing_writes.contains(&target) {
            return Err(BackendCode::WRITE);
        }
        let native = self
            .controls
            .iter()
            .find(|c| c.name == request.name())
            .map(|c| c.domain)
            .ok_or(BackendCode::INVALID)?;
        for i in self.native_instances(native, request.domain(), request.index())? {
            state.values.insert((request.name().to_string(), i), value);
        }
        debug!("software write {request} = {value}");
        state.writes.push(WriteRecord {
            name: request.name().to_string(),
            domain: request.domain(),
            index: request.index(),
            value,
        });
        Ok(())
    }
}

impl PlatformBackend for SoftwareBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn discover_topology(&self) -> BackendResult<TopologyTable> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        info!("Software backend discovery");
        Ok(self.table.clone())
    }

    fn signal_specs(&self) -> BackendResult<Vec<SignalSpec>> {
        let mirrored = self.controls.iter().map(|c| SignalSpec {
            name: c.name.clone(),
            description: format!("Current setting of {}", c.name),
            domain: c.domain,
            aggregation: Aggregation::Average,
            format: Format::Double,
            behavior: Behavior::Variable,
        });
        Ok(self.signals.iter().cloned().chain(mirrored).collect())
    }

    fn control_specs(&self) -> BackendResult<Vec<ControlSpec>> {
        Ok(self.controls.clone())
    }

    fn read_signal(&self, request: &ValidatedRequest) -> BackendResult<f64> {
        let state = self.state.lock();
        self.read_locked(&state, request)
    }

    fn write_control(&self, request: &ValidatedRequest, value: f64) -> BackendResult<()> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, request, value)
    }

    fn read_signals(&self, requests: &[&ValidatedRequest]) -> Vec<BackendResult<f64>> {
        let state = self.state.lock();
        requests.iter().map(|r| self.read_locked(&state, r)).collect()
    }

    fn write_controls(&self, writes: &[ControlWrite<'_>]) -> Vec<BackendResult<()>> {
        let mut state = self.state.lock();
        writes
            .iter()
            .map(|w| self.write_locked(&mut state, w.request, w.value))
            .collect()
    }

    fn save_controls(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let snapshot = state
            .values
            .iter()
            .filter(|((name, _), _)| self.controls.iter().any(|c| &c.name == name))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        state.saved = Some(snapshot);
        Ok(())
    }

    fn restore_controls(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let saved = state.saved.clone().ok_or(BackendCode::INVALID)?;
        state.values.extend(saved);
        Ok(())
    }
}

// ── Catalogue builders ──────────────────────────────────────────────────────

fn signal(name: &str, description: &str, domain: DomainType) -> SignalSpec {
    SignalSpec {
        name: name.to_string(),
        description: description.to_string(),
        domain,
        aggregation: Aggregation::Average,
        format: Format::Double,
        behavior: Behavior::Variable,
    }
}

fn control(name: &str, description: &str, domain: DomainType) -> ControlSpec {
    ControlSpec {
        name: name.to_string(),
        description: description.to_string(),
        domain,
    }
}

impl SignalSpec {
    #[must_use]
    fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    #[must_use]
    fn behave(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    #[must_use]
    fn print(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PioError;
    use crate::pio::PlatformIo;
    use platio_domain::RequestKind;
    use std::sync::Arc;

    fn open() -> (Arc<SoftwareBackend>, PlatformIo) {
        let backend = Arc::new(SoftwareBackend::default_platform());
        let table = backend.discover_topology().unwrap();
        let pio = PlatformIo::with_table(backend.clone(), table).unwrap();
        (backend, pio)
    }

    #[test]
    fn backend_type_is_software() {
        assert_eq!(SoftwareBackend::default_platform().backend_type(), BackendType::Software);
    }

    #[test]
    fn discovery_is_counted() {
        let backend = SoftwareBackend::default_platform();
        assert_eq!(backend.discovery_count(), 0);
        let table = backend.discover_topology().unwrap();
        assert_eq!(table.count(DomainType::Cpu), 16);
        assert_eq!(table.count(DomainType::Memory), 2);
        assert_eq!(backend.discovery_count(), 1);
    }

    #[test]
    fn controls_are_readable() {
        let backend = SoftwareBackend::default_platform();
        let specs = backend.signal_specs().unwrap();
        assert!(specs.iter().any(|s| s.name == "POWER_LIMIT"));
    }

    #[test]
    fn coarse_read_aggregates() {
        let (backend, pio) = open();
        backend.set_signal("CPU_FREQUENCY_STATUS", 0, 1.0e9);
        backend.set_signal("CPU_FREQUENCY_STATUS", 8, 3.0e9);
        // core 0 holds cpus 0 and 8
        let value = pio.read_signal("CPU_FREQUENCY_STATUS", "core", 0).unwrap();
        assert!((value - 2.0e9).abs() < 1.0);

        let energy = pio.read_signal("CPU_ENERGY", "board", 0).unwrap();
        assert!((energy - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fine_read_never_reaches_backend() {
        let (_, pio) = open();
        assert!(matches!(
            pio.read_signal("CPU_ENERGY", "cpu", 0),
            Err(PioError::IncompatibleDomains { .. })
        ));
        assert!(matches!(
            pio.write_control("POWER_LIMIT", "core", 0, 100.0),
            Err(PioError::IncompatibleDomains { .. })
        ));
    }

    #[test]
    fn coarse_write_fans_out() {
        let (backend, pio) = open();
        pio.write_control("CPU_FREQUENCY_MAX_CONTROL", "package", 1, 2.4e9).unwrap();
        let nested = pio.topology().domain_nested("cpu", "package", 1).unwrap();
        for cpu in nested {
            assert_eq!(backend.value("CPU_FREQUENCY_MAX_CONTROL", cpu), Some(2.4e9));
        }
        assert_eq!(backend.value("CPU_FREQUENCY_MAX_CONTROL", 0), Some(3.7e9));
        assert_eq!(backend.writes().len(), 1);
    }

    #[test]
    fn save_and_restore() {
        let (backend, pio) = open();
        assert_eq!(backend.restore_controls(), Err(BackendCode::INVALID));
        pio.save_control().unwrap();
        pio.write_control("POWER_LIMIT", "package", 0, 90.0).unwrap();
        assert_eq!(backend.value("POWER_LIMIT", 0), Some(90.0));
        pio.restore_control().unwrap();
        assert_eq!(backend.value("POWER_LIMIT", 0), Some(200.0));
    }

    #[test]
    fn injected_write_failure() {
        let (backend, pio) = open();
        backend.fail_writes_to("POWER_LIMIT", 0);
        let req = pio.validate("POWER_LIMIT", "package", 0, RequestKind::Control).unwrap();
        assert_eq!(backend.write_control(&req, 1.0), Err(BackendCode::WRITE));
        assert!(backend.writes().is_empty());
    }
}
