//! Signal and control name registry
//!
//! Built once from the backend's capability lists and read-only afterwards.

use std::collections::BTreeMap;

use platio_domain::{Aggregation, Behavior, DomainType, Format};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::backend::{check, ControlSpec, PlatformBackend, SignalSpec};
use crate::error::{PioError, Result};

/// Metadata describing how a signal is combined and printed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInfo {
    /// Backend-resolvable identifier (leading 8 bytes of the SHA-256 of
    /// the name, big-endian)
    pub id: u64,
    /// Reduction used at domains coarser than `domain`
    pub aggregation: Aggregation,
    /// Print format
    pub format: Format,
    /// Expected evolution over time
    pub behavior: Behavior,
    /// Native domain of the signal
    pub domain: DomainType,
}

#[derive(Debug, Clone)]
struct ControlEntry {
    description: String,
    domain: DomainType,
}

#[derive(Debug, Clone)]
struct SignalEntry {
    description: String,
    info: SignalInfo,
}

/// Name → metadata lookup for every signal and control on the platform
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    signals: BTreeMap<String, SignalEntry>,
    controls: BTreeMap<String, ControlEntry>,
}

impl NameRegistry {
    /// Build the registry from explicit capability lists
    ///
    /// Duplicate names keep their first entry.
    pub fn new(signals: Vec<SignalSpec>, controls: Vec<ControlSpec>) -> Self {
        let mut registry = Self::default();

        for spec in signals {
            if registry.signals.contains_key(&spec.name) {
                debug!("Ignoring duplicate signal {}", spec.name);
                continue;
            }
            let info = SignalInfo {
                id: signal_id(&spec.name),
                aggregation: spec.aggregation,
                format: spec.format,
                behavior: spec.behavior,
                domain: spec.domain,
            };
            registry.signals.insert(
                spec.name,
                SignalEntry {
                    description: spec.description,
                    info,
                },
            );
        }

        for spec in controls {
            if registry.controls.contains_key(&spec.name) {
                debug!("Ignoring duplicate control {}", spec.name);
                continue;
            }
            registry.controls.insert(
                spec.name,
                ControlEntry {
                    description: spec.description,
                    domain: spec.domain,
                },
            );
        }

        registry
    }

    /// Query `backend` for its capabilities and build the registry
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if either capability list fails.
    pub fn from_backend(backend: &dyn PlatformBackend) -> Result<Self> {
        let signals = check(backend, "signal_specs", backend.signal_specs())?;
        let controls = check(backend, "control_specs", backend.control_specs())?;
        let registry = Self::new(signals, controls);
        debug!(
            "Registry has {} signals and {} controls",
            registry.signals.len(),
            registry.controls.len()
        );
        Ok(registry)
    }

    /// All signal names, sorted
    pub fn signal_names(&self) -> Vec<String> {
        self.signals.keys().cloned().collect()
    }

    /// All control names, sorted
    pub fn control_names(&self) -> Vec<String> {
        self.controls.keys().cloned().collect()
    }

    /// Whether `name` is a known signal
    pub fn has_signal(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    /// Whether `name` is a known control
    pub fn has_control(&self, name: &str) -> bool {
        self.controls.contains_key(name)
    }

    /// # Errors
    ///
    /// Returns `UnknownSignalName` if `name` is not registered.
    pub fn signal_description(&self, name: &str) -> Result<&str> {
        self.signal(name).map(|e| e.description.as_str())
    }

    /// # Errors
    ///
    /// Returns `UnknownControlName` if `name` is not registered.
    pub fn control_description(&self, name: &str) -> Result<&str> {
        self.control(name).map(|e| e.description.as_str())
    }

    /// Aggregation, format, behavior and identifier of a signal
    ///
    /// # Errors
    ///
    /// Returns `UnknownSignalName` if `name` is not registered.
    pub fn signal_info(&self, name: &str) -> Result<SignalInfo> {
        self.signal(name).map(|e| e.info)
    }

    /// Native domain of a signal
    ///
    /// # Errors
    ///
    /// Returns `UnknownSignalName` if `name` is not registered.
    pub fn signal_domain_type(&self, name: &str) -> Result<DomainType> {
        self.signal(name).map(|e| e.info.domain)
    }

    /// Native domain of a control
    ///
    /// # Errors
    ///
    /// Returns `UnknownControlName` if `name` is not registered.
    pub fn control_domain_type(&self, name: &str) -> Result<DomainType> {
        self.control(name).map(|e| e.domain)
    }

    fn signal(&self, name: &str) -> Result<&SignalEntry> {
        self.signals.get(name).ok_or_else(|| PioError::UnknownSignalName {
            name: name.to_string(),
        })
    }

    fn control(&self, name: &str) -> Result<&ControlEntry> {
        self.controls.get(name).ok_or_else(|| PioError::UnknownControlName {
            name: name.to_string(),
        })
    }
}

/// Stable identifier derived from a signal name
pub fn signal_id(name: &str) -> u64 {
    Sha256::digest(name.as_bytes())
        .iter()
        .take(8)
        .fold(0, |id, &b| (id << 8) | u64::from(b))
}
