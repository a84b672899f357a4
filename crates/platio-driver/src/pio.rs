//! Platform I/O entry point
//!
//! [`PlatformIo`] owns the backend handle, the topology resolver and the
//! name registry. It is created explicitly and passed around by reference;
//! nothing in this crate keeps global state.

use std::sync::Arc;

use platio_domain::{DomainRef, RequestKind};
use tracing::{debug, info};

use crate::backend::{check, select_backend, BackendType, PlatformBackend};
use crate::batch::BatchSession;
use crate::cache::TopologyCache;
use crate::config::PioConfig;
use crate::error::Result;
use crate::registry::NameRegistry;
use crate::topology::{TopologyResolver, TopologyTable};
use crate::validate::{ValidatedRequest, Validator};

/// Initialized platform I/O context
#[derive(Debug)]
pub struct PlatformIo {
    backend: Arc<dyn PlatformBackend>,
    topology: TopologyResolver,
    registry: NameRegistry,
}

impl PlatformIo {
    /// Open `backend`, with topology served through `cache`
    ///
    /// Topology is not loaded until the first query that needs it.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the backend cannot list its signals
    /// or controls.
    pub fn init(backend: Arc<dyn PlatformBackend>, cache: TopologyCache) -> Result<Self> {
        info!(
            "Initializing platform I/O: backend={}, cache={}",
            backend.backend_type(),
            cache.path().display()
        );
        let registry = NameRegistry::from_backend(backend.as_ref())?;
        let topology = TopologyResolver::new(backend.clone(), cache);
        Ok(Self {
            backend,
            topology,
            registry,
        })
    }

    /// Select a backend and cache location from `config` and open it
    ///
    /// # Errors
    ///
    /// Returns error if the configured backend cannot be initialized.
    pub fn from_config(config: &PioConfig) -> Result<Self> {
        let backend = select_backend(config.backend, config)?;
        Self::init(backend, TopologyCache::new(&config.cache_path))
    }

    /// Open `backend` over a fixed topology; never touches the cache
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the backend cannot list its signals
    /// or controls.
    pub fn with_table(backend: Arc<dyn PlatformBackend>, table: TopologyTable) -> Result<Self> {
        let registry = NameRegistry::from_backend(backend.as_ref())?;
        Ok(Self {
            backend,
            topology: TopologyResolver::from_table(table),
            registry,
        })
    }

    /// Backend in use
    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    /// Topology resolver
    pub const fn topology(&self) -> &TopologyResolver {
        &self.topology
    }

    /// Name registry
    pub const fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Validator over this context's registry and topology
    pub const fn validator(&self) -> Validator<'_> {
        Validator::new(&self.registry, &self.topology)
    }

    /// Validate a request, see [`Validator::validate`]
    ///
    /// # Errors
    ///
    /// Returns the first failing validation check.
    pub fn validate(
        &self,
        name: &str,
        domain: impl Into<DomainRef>,
        index: i64,
        kind: RequestKind,
    ) -> Result<ValidatedRequest> {
        self.validator().validate(name, domain, index, kind)
    }

    /// Read one signal immediately
    ///
    /// # Errors
    ///
    /// Returns a validation error, or `BackendUnavailable` if the read fails.
    pub fn read_signal(&self, name: &str, domain: impl Into<DomainRef>, index: i64) -> Result<f64> {
        let request = self.validate(name, domain, index, RequestKind::Signal)?;
        let value = check(self.backend.as_ref(), "read_signal", self.backend.read_signal(&request))?;
        debug!("read {request} = {value}");
        Ok(value)
    }

    /// Write one control immediately
    ///
    /// # Errors
    ///
    /// Returns a validation error, or `BackendUnavailable` if the write fails.
    pub fn write_control(
        &self,
        name: &str,
        domain: impl Into<DomainRef>,
        index: i64,
        value: f64,
    ) -> Result<()> {
        let request = self.validate(name, domain, index, RequestKind::Control)?;
        check(
            self.backend.as_ref(),
            "write_control",
            self.backend.write_control(&request, value),
        )?;
        debug!("wrote {request} = {value}");
        Ok(())
    }

    /// New, empty batch session over this backend
    pub fn session(&self) -> BatchSession {
        BatchSession::new(self.backend.clone())
    }

    /// Snapshot every control setting
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable`, with `ERROR_NOT_IMPLEMENTED` if the
    /// backend has no snapshot support.
    pub fn save_control(&self) -> Result<()> {
        check(self.backend.as_ref(), "save_control", self.backend.save_controls())
    }

    /// Put back the settings captured by [`Self::save_control`]
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if nothing was saved or a write fails.
    pub fn restore_control(&self) -> Result<()> {
        check(
            self.backend.as_ref(),
            "restore_control",
            self.backend.restore_controls(),
        )
    }

    /// Render `value` in the signal's native format
    ///
    /// # Errors
    ///
    /// Returns `UnknownSignalName`.
    pub fn format_signal(&self, name: &str, value: f64) -> Result<String> {
        Ok(self.registry.signal_info(name)?.format.format(value))
    }
}
