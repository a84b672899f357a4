//! Hardware domain types and the containment rules between them.
//!
//! The set of domain types is fixed and totally ordered. Each type except
//! [`DomainType::Board`] has exactly one immediate parent, which makes the
//! containment relation a tree:
//!
//! ```text
//! board
//! ├── package
//! │   ├── core
//! │   │   └── cpu
//! │   ├── package_integrated_memory
//! │   ├── package_integrated_nic
//! │   └── package_integrated_gpu
//! ├── memory
//! ├── nic
//! └── gpu
//!     └── gpu_chip
//! ```

use std::fmt;
use std::str::FromStr;

/// Number of valid domain types.
pub const NUM_DOMAIN: usize = 11;

/// A hardware scope at which signals and controls are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum DomainType {
    /// Sentinel for an unresolved domain. Never counted, never nested.
    Invalid = -1,
    /// The whole node. Always exactly one instance.
    Board = 0,
    /// A processor socket.
    Package = 1,
    /// A physical core.
    Core = 2,
    /// A Linux logical CPU (hardware thread).
    Cpu = 3,
    /// A NUMA memory node attached to the board.
    Memory = 4,
    /// Memory packaged together with a processor (e.g. HBM).
    PackageIntegratedMemory = 5,
    /// A network interface card.
    Nic = 6,
    /// A network interface packaged together with a processor.
    PackageIntegratedNic = 7,
    /// A discrete accelerator board.
    Gpu = 8,
    /// An accelerator packaged together with a processor.
    PackageIntegratedGpu = 9,
    /// One chip of a multi-chip accelerator.
    GpuChip = 10,
}

impl DomainType {
    /// Every valid domain type, in order.
    pub const ALL: [Self; NUM_DOMAIN] = [
        Self::Board,
        Self::Package,
        Self::Core,
        Self::Cpu,
        Self::Memory,
        Self::PackageIntegratedMemory,
        Self::Nic,
        Self::PackageIntegratedNic,
        Self::Gpu,
        Self::PackageIntegratedGpu,
        Self::GpuChip,
    ];

    /// Resolve a domain from its integer value.
    ///
    /// Returns `None` unless `0 <= value < NUM_DOMAIN`.
    #[must_use]
    pub fn from_index(value: i64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Resolve a domain from its name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.name() == name)
    }

    /// Canonical lower-case name (`"package_integrated_gpu"`, ...).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Board => "board",
            Self::Package => "package",
            Self::Core => "core",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::PackageIntegratedMemory => "package_integrated_memory",
            Self::Nic => "nic",
            Self::PackageIntegratedNic => "package_integrated_nic",
            Self::Gpu => "gpu",
            Self::PackageIntegratedGpu => "package_integrated_gpu",
            Self::GpuChip => "gpu_chip",
        }
    }

    /// Position in [`DomainType::ALL`]; `None` for [`DomainType::Invalid`].
    #[must_use]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self as i32).ok()
    }

    /// Whether this is one of the [`NUM_DOMAIN`] valid types.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Immediate containing domain type.
    ///
    /// `None` for the board (the root) and for the invalid sentinel.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Invalid | Self::Board => None,
            Self::Package | Self::Memory | Self::Nic | Self::Gpu => Some(Self::Board),
            Self::Core
            | Self::PackageIntegratedMemory
            | Self::PackageIntegratedNic
            | Self::PackageIntegratedGpu => Some(Self::Package),
            Self::Cpu => Some(Self::Core),
            Self::GpuChip => Some(Self::Gpu),
        }
    }

    /// Chain of containing types from the immediate parent up to the board.
    pub fn ancestors(self) -> impl Iterator<Item = Self> {
        std::iter::successors(self.parent(), |d| d.parent())
    }
}

/// Whether every `inner` instance lies within exactly one `outer` instance.
///
/// A domain is nested within itself. Invalid domains are never nested.
#[must_use]
pub fn is_nested(inner: DomainType, outer: DomainType) -> bool {
    if !inner.is_valid() || !outer.is_valid() {
        return false;
    }
    inner == outer || inner.ancestors().any(|d| d == outer)
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Error returned when a domain name does not match any domain type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDomain(pub String);

impl fmt::Display for UnknownDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown domain name: {}", self.0)
    }
}

impl std::error::Error for UnknownDomain {}

impl FromStr for DomainType {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownDomain(s.to_string()))
    }
}

/// A domain as supplied by a caller: either a name or a raw integer.
///
/// Resolved exactly once, at the boundary, into a [`DomainType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DomainRef {
    /// Domain name, e.g. `"package"`.
    Name(String),
    /// Domain integer value, e.g. `1` for package.
    Index(i64),
}

impl From<&str> for DomainRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for DomainRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for DomainRef {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl From<i64> for DomainRef {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<i32> for DomainRef {
    fn from(value: i32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<DomainType> for DomainRef {
    fn from(domain: DomainType) -> Self {
        Self::Index(i64::from(domain as i32))
    }
}

impl fmt::Display for DomainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(value) => write!(f, "{value}"),
        }
    }
}
