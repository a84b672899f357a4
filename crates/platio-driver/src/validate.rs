//! Request validation
//!
//! Every request is checked against the registry and topology before any
//! backend sees it. Checks run in a fixed order:
//!
//! 1. the domain resolves (`UnknownDomainName` / `DomainOutOfRange`)
//! 2. the name is registered for the request kind
//! 3. the name's native domain is nested within the requested domain
//!    (`IncompatibleDomains`)
//! 4. the index lies in `[0, num_domain(domain))`
//!
//! Steps 1 to 3 need no topology, so a bad name or domain never triggers
//! discovery or touches the cache.

use std::fmt;

use platio_domain::{is_nested, DomainRef, DomainType, RequestKind};

use crate::error::{PioError, Result};
use crate::registry::NameRegistry;
use crate::topology::{domain_type, TopologyResolver};

/// A request that passed validation. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedRequest {
    name: String,
    domain: DomainType,
    index: usize,
    kind: RequestKind,
}

impl ValidatedRequest {
    /// Signal or control name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved domain
    pub const fn domain(&self) -> DomainType {
        self.domain
    }

    /// Domain index, known to be in range
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Signal or control
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Same name, domain and index as `other`, regardless of kind
    pub fn same_target(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.index == other.index
    }
}

impl fmt::Display for ValidatedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.kind, self.name, self.domain, self.index)
    }
}

/// Checks requests against a registry and topology
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    registry: &'a NameRegistry,
    topology: &'a TopologyResolver,
}

impl<'a> Validator<'a> {
    /// Validator over `registry` and `topology`
    pub const fn new(registry: &'a NameRegistry, topology: &'a TopologyResolver) -> Self {
        Self { registry, topology }
    }

    /// Validate one request
    ///
    /// # Errors
    ///
    /// Returns the first failing check, see the module docs.
    pub fn validate(
        &self,
        name: &str,
        domain: impl Into<DomainRef>,
        index: i64,
        kind: RequestKind,
    ) -> Result<ValidatedRequest> {
        let domain = domain_type(domain)?;

        let native = match kind {
            RequestKind::Signal => self.registry.signal_domain_type(name)?,
            RequestKind::Control => self.registry.control_domain_type(name)?,
        };
        // A backend can combine native samples upward, never split them
        if !is_nested(native, domain) {
            return Err(PioError::IncompatibleDomains {
                inner: native,
                outer: domain,
            });
        }

        let count = self.topology.num_domain(domain)?;
        let index = usize::try_from(index)
            .ok()
            .filter(|&i| i < count)
            .ok_or(PioError::DomainIndexOutOfRange {
                domain,
                index,
                count,
            })?;

        Ok(ValidatedRequest {
            name: name.to_string(),
            domain,
            index,
            kind,
        })
    }
}
