//! Platform backend implementations
//!
//! Two backends available:
//! - **Sysfs**: Linux cpufreq and CPU topology under `/sys` (real nodes)
//! - **Software**: in-memory virtual platform (CI, dry runs, failure injection)

pub mod software;
pub mod sysfs;

pub use software::SoftwareBackend;
pub use sysfs::SysfsBackend;
