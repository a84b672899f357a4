//! Platform I/O addressing and batching for Linux nodes.
//!
//! This crate resolves hardware domains (board, package, core, cpu, ...)
//! into nested index spaces, validates signal and control requests against
//! the platform, and executes groups of them as one batch.
//!
//! # Components
//!
//! ```text
//! PlatformIo
//!   ├── NameRegistry       signal / control names and metadata
//!   ├── TopologyResolver   domain counts and nesting
//!   │     └── TopologyCache   /run/platio/topo-cache (0644, per boot)
//!   ├── Validator          name + domain + index checks
//!   └── BatchSession       push / adjust / read_all / sample / commit
//!
//! PlatformBackend (trait)
//!   ├── SysfsBackend       cpufreq + topology from /sys
//!   └── SoftwareBackend    in-memory virtual platform (CI, dry runs)
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use platio_driver::{PlatformIo, RequestKind, SoftwareBackend, TopologyTable};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(SoftwareBackend::default_platform());
//! let pio = PlatformIo::with_table(backend, TopologyTable::uniform(2, 4, 2))?;
//!
//! let session = pio.session();
//! let limit0 = session.push(pio.validate("POWER_LIMIT", "package", 0, RequestKind::Control)?)?;
//! let limit1 = session.push(pio.validate("POWER_LIMIT", "package", 1, RequestKind::Control)?)?;
//! session.adjust(limit0, 150.0)?;
//! session.adjust(limit1, 140.0)?;
//! assert_eq!(session.commit()?, 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod batch;
mod cache;
mod config;
mod error;
mod pio;
mod registry;
pub mod script;
mod topology;
mod validate;

/// Backend error codes (re-exported from platio-domain).
pub mod codes {
    pub use platio_domain::codes::*;
}

pub use platio_domain::{
    is_nested, Aggregation, Behavior, DomainRef, DomainType, Format, RequestKind, NUM_DOMAIN,
};

pub use backend::{
    check, select_backend, BackendCode, BackendResult, BackendSelection, BackendType,
    ControlSpec, ControlWrite, PlatformBackend, SignalSpec,
};
pub use backends::software::{SoftwareBackend, WriteRecord};
pub use backends::sysfs::SysfsBackend;
pub use batch::{BatchSession, Handle, SessionState};
pub use cache::{CacheStatus, TopologyCache, CACHE_MODE, DEFAULT_CACHE_PATH};
pub use config::PioConfig;
pub use error::{HandleFailure, PioError, Result};
pub use pio::PlatformIo;
pub use registry::{signal_id, NameRegistry, SignalInfo};
pub use script::{parse_line, run_batch, BatchMode, BatchReport};
pub use topology::{domain_name, domain_type, TopologyResolver, TopologyTable};
pub use validate::{ValidatedRequest, Validator};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BatchMode, BatchSession, DomainType, Handle, PioConfig, PioError, PlatformBackend,
        PlatformIo, RequestKind, Result, TopologyCache, ValidatedRequest,
    };
}
