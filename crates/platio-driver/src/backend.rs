//! Backend abstraction for platform signal and control access
//!
//! The core only ever talks to hardware through [`PlatformBackend`]. A
//! backend reports failures as negative integer codes (see
//! [`platio_domain::codes`]); the core turns them into typed errors with the
//! backend's own message and never interprets a code beyond its sign.

use std::fmt::{self, Debug};
use std::sync::Arc;

use platio_domain::{codes, Aggregation, Behavior, DomainType, Format};

use crate::config::PioConfig;
use crate::error::{PioError, Result};
use crate::topology::TopologyTable;
use crate::validate::ValidatedRequest;

/// Negative status code returned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendCode(i32);

impl BackendCode {
    /// Generic runtime failure
    pub const RUNTIME: Self = Self(codes::ERROR_RUNTIME);
    /// Invalid argument
    pub const INVALID: Self = Self(codes::ERROR_INVALID);
    /// Operation not supported by this backend
    pub const NOT_IMPLEMENTED: Self = Self(codes::ERROR_NOT_IMPLEMENTED);
    /// Platform not supported
    pub const PLATFORM_UNSUPPORTED: Self = Self(codes::ERROR_PLATFORM_UNSUPPORTED);
    /// Register or file read failed
    pub const READ: Self = Self(codes::ERROR_MSR_READ);
    /// Register or file write failed
    pub const WRITE: Self = Self(codes::ERROR_MSR_WRITE);

    /// Wrap a raw code. Non-negative values are clamped to [`Self::RUNTIME`]
    /// since a success code is never an error.
    pub const fn new(code: i32) -> Self {
        if code < 0 {
            Self(code)
        } else {
            Self::RUNTIME
        }
    }

    /// Raw integer code (always negative)
    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for BackendCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a backend call
pub type BackendResult<T> = std::result::Result<T, BackendCode>;

/// A signal as advertised by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    /// Unique signal name, e.g. `CPU_FREQUENCY_STATUS`
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Finest domain the backend samples this signal at
    pub domain: DomainType,
    /// How samples combine at coarser domains
    pub aggregation: Aggregation,
    /// How a sample is printed
    pub format: Format,
    /// How the signal evolves over time
    pub behavior: Behavior,
}

/// A control as advertised by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSpec {
    /// Unique control name, e.g. `CPU_FREQUENCY_MAX_CONTROL`
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Finest domain the backend applies this control at
    pub domain: DomainType,
}

/// One pending control write handed to [`PlatformBackend::write_controls`]
#[derive(Debug, Clone, Copy)]
pub struct ControlWrite<'a> {
    /// Validated control request
    pub request: &'a ValidatedRequest,
    /// Setting to apply
    pub value: f64,
}

/// Platform backend trait - the capability contract the core depends on
///
/// Every method receives only requests that passed the validator, so
/// backends never see unknown names or out-of-range indices.
pub trait PlatformBackend: Debug + Send + Sync {
    /// Backend type for logging and diagnostics
    fn backend_type(&self) -> BackendType;

    /// Discover the full domain topology of this node
    ///
    /// # Errors
    ///
    /// Returns a code if the topology cannot be determined.
    fn discover_topology(&self) -> BackendResult<TopologyTable>;

    /// List the signals this backend can read
    ///
    /// # Errors
    ///
    /// Returns a code if the catalogue cannot be produced.
    fn signal_specs(&self) -> BackendResult<Vec<SignalSpec>>;

    /// List the controls this backend can write
    ///
    /// # Errors
    ///
    /// Returns a code if the catalogue cannot be produced.
    fn control_specs(&self) -> BackendResult<Vec<ControlSpec>>;

    /// Read one signal immediately
    ///
    /// # Errors
    ///
    /// Returns a code if the hardware read fails.
    fn read_signal(&self, request: &ValidatedRequest) -> BackendResult<f64>;

    /// Write one control immediately
    ///
    /// # Errors
    ///
    /// Returns a code if the hardware write fails.
    fn write_control(&self, request: &ValidatedRequest, value: f64) -> BackendResult<()>;

    /// Read a group of signals in one pass
    ///
    /// The default reads them one by one. Results are in request order.
    fn read_signals(&self, requests: &[&ValidatedRequest]) -> Vec<BackendResult<f64>> {
        requests.iter().map(|r| self.read_signal(r)).collect()
    }

    /// Apply a group of control writes in one pass
    ///
    /// The default writes them one by one in order and keeps going after a
    /// failure, so the caller learns the outcome of every write. Results are
    /// in write order.
    fn write_controls(&self, writes: &[ControlWrite<'_>]) -> Vec<BackendResult<()>> {
        writes
            .iter()
            .map(|w| self.write_control(w.request, w.value))
            .collect()
    }

    /// Snapshot every control so [`Self::restore_controls`] can put it back
    ///
    /// # Errors
    ///
    /// Returns [`BackendCode::NOT_IMPLEMENTED`] unless overridden.
    fn save_controls(&self) -> BackendResult<()> {
        Err(BackendCode::NOT_IMPLEMENTED)
    }

    /// Restore the last snapshot taken by [`Self::save_controls`]
    ///
    /// # Errors
    ///
    /// Returns [`BackendCode::NOT_IMPLEMENTED`] unless overridden.
    fn restore_controls(&self) -> BackendResult<()> {
        Err(BackendCode::NOT_IMPLEMENTED)
    }

    /// Message text for a code this backend returned
    fn error_message(&self, code: BackendCode) -> String {
        codes::message(code.code()).to_string()
    }
}

/// Convert a backend result into a typed error using the backend's messages
///
/// # Errors
///
/// Returns [`PioError::BackendUnavailable`] when `result` holds a code.
pub fn check<T>(
    backend: &dyn PlatformBackend,
    operation: &str,
    result: BackendResult<T>,
) -> Result<T> {
    result.map_err(|code| PioError::backend(operation, code.code(), backend.error_message(code)))
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Linux sysfs (cpufreq + topology)
    Sysfs,

    /// Software (virtual platform) - in-memory, no hardware required
    Software,
}

impl BackendType {
    /// Short lower-case name (`"sysfs"`, `"software"`)
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sysfs => "sysfs",
            Self::Software => "software",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sysfs => write!(f, "sysfs"),
            Self::Software => write!(f, "Software (virtual platform)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Automatically select best available
    #[default]
    Auto,

    /// Force the sysfs backend
    Sysfs,

    /// Force the software backend - for CI and dry runs
    Software,
}

impl std::str::FromStr for BackendSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sysfs" => Ok(Self::Sysfs),
            "software" | "sw" => Ok(Self::Software),
            other => Err(format!("unknown backend: {other} (expected auto|sysfs|software)")),
        }
    }
}

/// Select appropriate backend based on availability
///
/// # Errors
///
/// Returns error if the forced backend cannot be initialized.
pub fn select_backend(
    selection: BackendSelection,
    config: &PioConfig,
) -> Result<Arc<dyn PlatformBackend>> {
    use crate::backends::software::SoftwareBackend;
    use crate::backends::sysfs::SysfsBackend;

    match selection {
        BackendSelection::Auto => {
            if let Ok(backend) = SysfsBackend::init(&config.sysfs_root) {
                tracing::info!("Using sysfs backend at {}", config.sysfs_root.display());
                return Ok(Arc::new(backend));
            }

            tracing::info!("sysfs unavailable, using software backend");
            Ok(Arc::new(SoftwareBackend::default_platform()))
        }

        BackendSelection::Sysfs => {
            SysfsBackend::init(&config.sysfs_root).map(|b| Arc::new(b) as Arc<dyn PlatformBackend>)
        }

        BackendSelection::Software => Ok(Arc::new(SoftwareBackend::default_platform())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_negative_codes_are_clamped() {
        assert_eq!(BackendCode::new(0), BackendCode::RUNTIME);
        assert_eq!(BackendCode::new(5), BackendCode::RUNTIME);
        assert_eq!(BackendCode::new(-9).code(), -9);
    }

    #[test]
    fn selection_parsing() {
        assert_eq!("auto".parse(), Ok(BackendSelection::Auto));
        assert_eq!(" SYSFS ".parse(), Ok(BackendSelection::Sysfs));
        assert_eq!("sw".parse(), Ok(BackendSelection::Software));
        assert!("msr".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn forced_software_backend() {
        let backend = select_backend(BackendSelection::Software, &PioConfig::default())
            .expect("software backend always initializes");
        assert_eq!(backend.backend_type(), BackendType::Software);
    }
}
