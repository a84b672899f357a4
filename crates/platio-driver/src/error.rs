//! Error types for platform I/O operations

use std::fmt;
use std::path::PathBuf;

use platio_domain::{DomainType, RequestKind};
use thiserror::Error;

use crate::batch::Handle;

/// Result type alias for platform I/O operations
pub type Result<T> = std::result::Result<T, PioError>;

/// A control handle that did not reach the backend during a commit
#[derive(Debug, Clone, PartialEq)]
pub struct HandleFailure {
    /// Handle whose write failed
    pub handle: Handle,
    /// Negative backend code
    pub code: i32,
    /// Backend message for `code`
    pub message: String,
}

impl fmt::Display for HandleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle {} ({}: {})", self.handle, self.code, self.message)
    }
}

/// Errors that can occur while resolving, validating or executing requests
#[derive(Debug, Error)]
pub enum PioError {
    /// Domain name not in the domain table
    #[error("Unknown domain name: {name}")]
    UnknownDomainName {
        /// Name that was looked up
        name: String,
    },

    /// Integer domain value outside `[0, NUM_DOMAIN)`
    #[error("Domain type is out of range: {value}")]
    DomainOutOfRange {
        /// Value that was supplied
        value: i64,
    },

    /// Domain index outside `[0, num_domain(domain))`
    #[error("Domain index {index} out of range for {domain} (have {count})")]
    DomainIndexOutOfRange {
        /// Domain being indexed
        domain: DomainType,
        /// Requested index
        index: i64,
        /// Number of instances of `domain`
        count: usize,
    },

    /// Logical CPU index outside the CPU domain
    #[error("Invalid CPU index {cpu} (have {count} CPUs)")]
    InvalidCpuIndex {
        /// Requested CPU
        cpu: i64,
        /// Number of CPUs
        count: usize,
    },

    /// Inner domain is not contained within the outer domain
    #[error("Domain {inner} is not nested within {outer}")]
    IncompatibleDomains {
        /// Inner (contained) domain
        inner: DomainType,
        /// Outer (containing) domain
        outer: DomainType,
    },

    /// Signal name not registered
    #[error("Unknown signal name: {name}")]
    UnknownSignalName {
        /// Name that was looked up
        name: String,
    },

    /// Control name not registered
    #[error("Unknown control name: {name}")]
    UnknownControlName {
        /// Name that was looked up
        name: String,
    },

    /// Same request registered as both a signal and a control
    #[error("{name} {domain} {index} is already registered as a {existing} in this session")]
    ConflictingRequest {
        /// Request name
        name: String,
        /// Request domain
        domain: DomainType,
        /// Request domain index
        index: usize,
        /// Kind of the existing registration
        existing: RequestKind,
    },

    /// Handle was never returned by this session
    #[error("Unknown handle: {handle}")]
    UnknownHandle {
        /// Offending handle
        handle: Handle,
    },

    /// Handle refers to the other kind of request
    #[error("Handle {handle} refers to a {actual}, expected a {expected}")]
    WrongRequestKind {
        /// Offending handle
        handle: Handle,
        /// Kind the operation needs
        expected: RequestKind,
        /// Kind the handle was registered as
        actual: RequestKind,
    },

    /// Some control writes in a commit did not reach the backend
    #[error("Commit applied {applied} write(s), {} failed: {}", .failed.len(), join_failures(.failed))]
    PartialCommitFailure {
        /// Writes that failed, in handle order
        failed: Vec<HandleFailure>,
        /// Number of writes that succeeded
        applied: usize,
    },

    /// Topology cache cannot be parsed or fails validation
    #[error("Topology cache {} is corrupt: {reason}", .path.display())]
    CacheCorrupt {
        /// Cache file path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Backend reported a negative code
    #[error("{operation} failed: {message} ({code})")]
    BackendUnavailable {
        /// Operation that failed
        operation: String,
        /// Negative backend code
        code: i32,
        /// Backend message for `code`
        message: String,
    },

    /// Operation not allowed in the current session state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Description of the violation
        state: String,
    },

    /// Batch request line could not be parsed
    #[error("Unable to parse request line {line}: {reason}")]
    MalformedRequest {
        /// 1-based line number
        line: usize,
        /// Reason for failure
        reason: String,
    },

    /// I/O error while reading or writing the topology cache
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

fn join_failures(failed: &[HandleFailure]) -> String {
    failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PioError {
    /// Create a backend failure error
    pub fn backend(operation: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a corrupt cache error
    pub fn cache_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed request line error
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            line,
            reason: reason.into(),
        }
    }

    /// Whether this error concerns only the offending request.
    ///
    /// Validation errors never invalidate a session; callers may keep
    /// pushing other requests after one.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownDomainName { .. }
                | Self::DomainOutOfRange { .. }
                | Self::DomainIndexOutOfRange { .. }
                | Self::InvalidCpuIndex { .. }
                | Self::IncompatibleDomains { .. }
                | Self::UnknownSignalName { .. }
                | Self::UnknownControlName { .. }
                | Self::ConflictingRequest { .. }
                | Self::UnknownHandle { .. }
                | Self::WrongRequestKind { .. }
                | Self::MalformedRequest { .. }
        )
    }
}
