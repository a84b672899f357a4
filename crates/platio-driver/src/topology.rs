//! Domain topology resolution
//!
//! A [`TopologyTable`] records how many instances of each domain type exist
//! and, for every instance below the board, which instance of its parent
//! type contains it. Nesting between any two types is derived from that on
//! each query by walking the parent chain; no graph is stored.
//!
//! [`TopologyResolver`] answers the counting and nesting queries. The table
//! behind it is loaded lazily, the first time a query needs it, from the
//! topology cache (which discovers and writes it if needed).

use std::sync::Arc;

use once_cell::sync::OnceCell;
use platio_domain::{is_nested, DomainRef, DomainType, NUM_DOMAIN};
use serde::{Deserialize, Serialize};

use crate::backend::PlatformBackend;
use crate::cache::TopologyCache;
use crate::error::{PioError, Result};

/// Instance counts and parent links for every domain type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyTable {
    /// Instance count per domain type, indexed by `DomainType::index()`
    counts: Vec<usize>,
    /// `parents[d][i]` is the parent-type instance containing instance `i`
    /// of domain `d`. Empty for the board.
    parents: Vec<Vec<usize>>,
}

impl Default for TopologyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyTable {
    /// A table with a single board and nothing else
    pub fn new() -> Self {
        let mut counts = vec![0; NUM_DOMAIN];
        counts[0] = 1;
        Self {
            counts,
            parents: vec![Vec::new(); NUM_DOMAIN],
        }
    }

    /// Symmetric CPU topology, numbered the way Linux numbers SMT siblings:
    /// logical CPU `c` belongs to core `c % num_cores`, and core `k` belongs
    /// to package `k / cores_per_package`.
    pub fn uniform(packages: usize, cores_per_package: usize, cpus_per_core: usize) -> Self {
        let num_core = packages * cores_per_package;
        let num_cpu = num_core * cpus_per_core;
        Self::new()
            .with_domain(DomainType::Package, vec![0; packages])
            .with_domain(
                DomainType::Core,
                (0..num_core).map(|k| k / cores_per_package.max(1)).collect(),
            )
            .with_domain(
                DomainType::Cpu,
                (0..num_cpu).map(|c| c % num_core.max(1)).collect(),
            )
    }

    /// Set the instances of `domain`: one entry per instance, holding the
    /// index of the parent-type instance that contains it.
    ///
    /// The board always has exactly one instance; attempts to set it and
    /// the invalid sentinel are ignored.
    #[must_use]
    pub fn with_domain(mut self, domain: DomainType, parents: Vec<usize>) -> Self {
        if domain == DomainType::Board {
            return self;
        }
        if let Some(idx) = domain.index() {
            self.counts[idx] = parents.len();
            self.parents[idx] = parents;
        }
        self
    }

    /// Number of instances of `domain` (0 for absent or invalid domains)
    pub fn count(&self, domain: DomainType) -> usize {
        domain
            .index()
            .and_then(|idx| self.counts.get(idx).copied())
            .unwrap_or(0)
    }

    /// Index of the parent-type instance containing instance `index`
    pub fn parent_index(&self, domain: DomainType, index: usize) -> Option<usize> {
        if domain == DomainType::Board {
            return None;
        }
        self.parents.get(domain.index()?)?.get(index).copied()
    }

    /// Index of the `outer` instance that contains instance `index` of
    /// `inner`, or `None` if `inner` is not nested in `outer`.
    pub fn ancestor_index(&self, inner: DomainType, index: usize, outer: DomainType) -> Option<usize> {
        if !is_nested(inner, outer) || index >= self.count(inner) {
            return None;
        }
        let mut domain = inner;
        let mut idx = index;
        while domain != outer {
            idx = self.parent_index(domain, idx)?;
            domain = domain.parent()?;
        }
        Some(idx)
    }

    /// Check that the table is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.counts.len() != NUM_DOMAIN || self.parents.len() != NUM_DOMAIN {
            return Err(format!(
                "expected {NUM_DOMAIN} domain entries, found {} counts and {} parent lists",
                self.counts.len(),
                self.parents.len()
            ));
        }
        if self.counts[0] != 1 {
            return Err(format!("board count must be 1, found {}", self.counts[0]));
        }
        for domain in DomainType::ALL.iter().skip(1).copied() {
            let count = self.count(domain);
            let Some(idx) = domain.index() else { continue };
            let parents = &self.parents[idx];
            if parents.len() != count {
                return Err(format!(
                    "{domain}: {count} instances but {} parent links",
                    parents.len()
                ));
            }
            let Some(parent) = domain.parent() else { continue };
            let parent_count = self.count(parent);
            if let Some((i, p)) = parents.iter().enumerate().find(|&(_, &p)| p >= parent_count) {
                return Err(format!(
                    "{domain} {i} points at {parent} {p}, but only {parent_count} exist"
                ));
            }
        }
        Ok(())
    }
}

/// Resolve a caller-supplied domain into a [`DomainType`].
///
/// Needs no topology; the domain set is fixed.
///
/// # Errors
///
/// Returns `UnknownDomainName` for an unrecognized name, `DomainOutOfRange`
/// for an integer outside `[0, NUM_DOMAIN)`.
pub fn domain_type(domain: impl Into<DomainRef>) -> Result<DomainType> {
    match domain.into() {
        DomainRef::Name(name) => {
            DomainType::from_name(&name).ok_or(PioError::UnknownDomainName { name })
        }
        DomainRef::Index(value) => {
            DomainType::from_index(value).ok_or(PioError::DomainOutOfRange { value })
        }
    }
}

/// Canonical name of a domain type; the inverse of [`domain_type`].
pub fn domain_name(domain: DomainType) -> &'static str {
    domain.name()
}

/// Answers domain counting and nesting queries
#[derive(Debug)]
pub struct TopologyResolver {
    table: OnceCell<TopologyTable>,
    source: Option<(Arc<dyn PlatformBackend>, TopologyCache)>,
}

impl TopologyResolver {
    /// Resolver that loads its table from `cache`, discovering through
    /// `backend` when the cache is missing or invalid
    pub fn new(backend: Arc<dyn PlatformBackend>, cache: TopologyCache) -> Self {
        Self {
            table: OnceCell::new(),
            source: Some((backend, cache)),
        }
    }

    /// Resolver over a fixed table; never touches the filesystem
    pub fn from_table(table: TopologyTable) -> Self {
        Self {
            table: OnceCell::with_value(table),
            source: None,
        }
    }

    /// The topology table, loading it on first use
    ///
    /// # Errors
    ///
    /// Returns error if discovery fails or the cache is corrupt twice.
    pub fn table(&self) -> Result<&TopologyTable> {
        self.table.get_or_try_init(|| match &self.source {
            Some((backend, cache)) => cache.load_or_discover(backend.as_ref()),
            None => Ok(TopologyTable::new()),
        })
    }

    /// See [`domain_type`]
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomainName` or `DomainOutOfRange`.
    pub fn domain_type(&self, domain: impl Into<DomainRef>) -> Result<DomainType> {
        domain_type(domain)
    }

    /// See [`domain_name`]
    pub fn domain_name(&self, domain: DomainType) -> &'static str {
        domain_name(domain)
    }

    /// Number of instances of `domain` on this node
    ///
    /// A domain type that exists but is absent on this hardware yields 0.
    ///
    /// # Errors
    ///
    /// Returns a domain resolution error, or a topology load error.
    pub fn num_domain(&self, domain: impl Into<DomainRef>) -> Result<usize> {
        let domain = domain_type(domain)?;
        Ok(self.table()?.count(domain))
    }

    /// Every valid domain type with its instance count, in domain order
    ///
    /// # Errors
    ///
    /// Returns a topology load error.
    pub fn domain_counts(&self) -> Result<Vec<(DomainType, usize)>> {
        let table = self.table()?;
        Ok(DomainType::ALL.iter().map(|&d| (d, table.count(d))).collect())
    }

    /// Index of the `domain` instance containing logical CPU `cpu`
    ///
    /// # Errors
    ///
    /// Returns `InvalidCpuIndex` if `cpu` is out of range, or
    /// `IncompatibleDomains` if `domain` does not contain CPUs.
    pub fn domain_index(&self, domain: impl Into<DomainRef>, cpu: i64) -> Result<usize> {
        let domain = domain_type(domain)?;
        let table = self.table()?;
        let count = table.count(DomainType::Cpu);
        let cpu_idx = usize::try_from(cpu)
            .ok()
            .filter(|&c| c < count)
            .ok_or(PioError::InvalidCpuIndex { cpu, count })?;
        if !is_nested(DomainType::Cpu, domain) {
            return Err(PioError::IncompatibleDomains {
                inner: DomainType::Cpu,
                outer: domain,
            });
        }
        table
            .ancestor_index(DomainType::Cpu, cpu_idx, domain)
            .ok_or_else(|| PioError::invalid_state(format!("cpu {cpu_idx} has no containing {domain}")))
    }

    /// Indices of the `inner` instances contained within instance
    /// `outer_index` of `outer`, in ascending order
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleDomains` if `inner` is not nested in `outer`, or
    /// `DomainIndexOutOfRange` if `outer_index` is out of range.
    pub fn domain_nested(
        &self,
        inner: impl Into<DomainRef>,
        outer: impl Into<DomainRef>,
        outer_index: i64,
    ) -> Result<Vec<usize>> {
        let inner = domain_type(inner)?;
        let outer = domain_type(outer)?;
        if !is_nested(inner, outer) {
            return Err(PioError::IncompatibleDomains { inner, outer });
        }
        let table = self.table()?;
        let count = table.count(outer);
        let outer_idx = usize::try_from(outer_index)
            .ok()
            .filter(|&i| i < count)
            .ok_or(PioError::DomainIndexOutOfRange {
                domain: outer,
                index: outer_index,
                count,
            })?;
        Ok((0..table.count(inner))
            .filter(|&i| table.ancestor_index(inner, i, outer) == Some(outer_idx))
            .collect())
    }
}
