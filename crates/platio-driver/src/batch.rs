//! Batch transaction engine
//!
//! A [`BatchSession`] accumulates validated requests, each identified by a
//! [`Handle`], and executes them as a group:
//!
//! ```text
//! Empty ──push──▶ Registering ──adjust / read_all──▶ Ready ──commit──▶ Committed
//!                     ▲                                                   │
//!                     └──────────────────────push─────────────────────────┘
//! ```
//!
//! Handles are issued in insertion order and never reused. Control values
//! are buffered by `adjust` and only reach the backend on `commit`, in
//! handle order.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use platio_domain::RequestKind;
use tracing::{debug, warn};

use crate::backend::{BackendCode, ControlWrite, PlatformBackend};
use crate::error::{HandleFailure, PioError, Result};
use crate::validate::ValidatedRequest;

/// Identifier of a request registered in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
    /// Wrap a raw handle value
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw handle value (insertion position in the session)
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing registered yet
    Empty,
    /// Accepting new requests
    Registering,
    /// Adjusted or sampled; no more pushes until commit
    Ready,
    /// All outstanding writes reached the backend
    Committed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Registering => "registering",
            Self::Ready => "ready",
            Self::Committed => "committed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Entry {
    request: ValidatedRequest,
    /// Last adjusted setting (controls) or last sample (signals)
    value: Option<f64>,
    /// Control adjusted since its last successful write
    outstanding: bool,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    entries: Vec<Entry>,
}

impl Inner {
    fn entry(&self, handle: Handle) -> Result<&Entry> {
        self.entries
            .get(handle.index())
            .ok_or(PioError::UnknownHandle { handle })
    }

    fn expect_kind(&self, handle: Handle, expected: RequestKind) -> Result<&Entry> {
        let entry = self.entry(handle)?;
        let actual = entry.request.kind();
        if actual != expected {
            return Err(PioError::WrongRequestKind {
                handle,
                expected,
                actual,
            });
        }
        Ok(entry)
    }
}

/// A group of signal and control requests executed together
#[derive(Debug)]
pub struct BatchSession {
    backend: Arc<dyn PlatformBackend>,
    inner: Mutex<Inner>,
}

impl BatchSession {
    /// Empty session writing through `backend`
    pub fn new(backend: Arc<dyn PlatformBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                state: SessionState::Empty,
                entries: Vec::new(),
            }),
        }
    }

    /// Register a request and return its handle
    ///
    /// Registering an identical request again returns the existing handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the session is `Ready`, or
    /// `ConflictingRequest` if the same target is already registered as the
    /// other kind.
    pub fn push(&self, request: ValidatedRequest) -> Result<Handle> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Ready {
            return Err(PioError::invalid_state(
                "cannot push requests after adjust or read_all; commit first",
            ));
        }

        if let Some((pos, existing)) = inner
            .entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.request.same_target(&request))
        {
            if existing.request.kind() == request.kind() {
                return Ok(Handle::new(pos));
            }
            return Err(PioError::ConflictingRequest {
                name: request.name().to_string(),
                domain: request.domain(),
                index: request.index(),
                existing: existing.request.kind(),
            });
        }

        let handle = Handle::new(inner.entries.len());
        debug!("push {request} -> handle {handle}");
        inner.entries.push(Entry {
            request,
            value: None,
            outstanding: false,
        });
        inner.state = SessionState::Registering;
        Ok(handle)
    }

    /// Set the value a control handle will be written with on commit
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or `WrongRequestKind`.
    pub fn adjust(&self, handle: Handle, value: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.expect_kind(handle, RequestKind::Control)?;
        let entry = &mut inner.entries[handle.index()];
        entry.value = Some(value);
        entry.outstanding = true;
        inner.state = SessionState::Ready;
        Ok(())
    }

    /// Write every outstanding adjustment to the backend, in handle order
    ///
    /// Returns the number of writes applied.
    ///
    /// # Errors
    ///
    /// Returns `PartialCommitFailure` if any write fails. Failed handles stay
    /// outstanding and the session stays `Ready`.
    pub fn commit(&self) -> Result<usize> {
        let mut inner = self.inner.lock();

        let pending: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.outstanding)
            .map(|(pos, _)| pos)
            .collect();

        let results = {
            let writes: Vec<ControlWrite<'_>> = pending
                .iter()
                .filter_map(|&pos| {
                    let entry = &inner.entries[pos];
                    entry.value.map(|value| ControlWrite {
                        request: &entry.request,
                        value,
                    })
                })
                .collect();
            self.backend.write_controls(&writes)
        };
        if results.len() != pending.len() {
            warn!(
                "Backend returned {} results for {} writes",
                results.len(),
                pending.len()
            );
        }

        let mut failed = Vec::new();
        let mut applied = 0;
        for (i, &pos) in pending.iter().enumerate() {
            let handle = Handle::new(pos);
            match results.get(i).copied().unwrap_or(Err(BackendCode::RUNTIME)) {
                Ok(()) => {
                    inner.entries[pos].outstanding = false;
                    applied += 1;
                }
                Err(code) => failed.push(HandleFailure {
                    handle,
                    code: code.code(),
                    message: self.backend.error_message(code),
                }),
            }
        }

        if failed.is_empty() {
            debug!("commit applied {applied} write(s)");
            inner.state = SessionState::Committed;
            Ok(applied)
        } else {
            inner.state = SessionState::Ready;
            Err(PioError::PartialCommitFailure { failed, applied })
        }
    }

    /// Read every signal handle in one backend pass
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` for the first failing read. No sample is
    /// updated in that case.
    pub fn read_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        let signals: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.request.kind() == RequestKind::Signal)
            .map(|(pos, _)| pos)
            .collect();

        let results = {
            let requests: Vec<&ValidatedRequest> =
                signals.iter().map(|&pos| &inner.entries[pos].request).collect();
            self.backend.read_signals(&requests)
        };

        let mut samples = Vec::with_capacity(signals.len());
        for (i, &pos) in signals.iter().enumerate() {
            match results.get(i).copied().unwrap_or(Err(BackendCode::RUNTIME)) {
                Ok(value) => samples.push((pos, value)),
                Err(code) => {
                    return Err(PioError::backend(
                        format!("read_all (handle {pos})"),
                        code.code(),
                        self.backend.error_message(code),
                    ));
                }
            }
        }

        for (pos, value) in samples {
            inner.entries[pos].value = Some(value);
        }
        inner.state = SessionState::Ready;
        Ok(())
    }

    /// Read one signal handle and keep the value as its sample
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle`, `WrongRequestKind`, or `BackendUnavailable`
    /// if the read fails; the previous sample is kept in that case.
    pub fn read(&self, handle: Handle) -> Result<f64> {
        let mut inner = self.inner.lock();
        let entry = inner.expect_kind(handle, RequestKind::Signal)?;
        let value = self.backend.read_signal(&entry.request).map_err(|code| {
            PioError::backend(
                format!("read (handle {handle})"),
                code.code(),
                self.backend.error_message(code),
            )
        })?;
        inner.entries[handle.index()].value = Some(value);
        inner.state = SessionState::Ready;
        Ok(value)
    }

    /// Last value of a signal handle as read by [`Self::read_all`] or
    /// [`Self::read`]
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle`, `WrongRequestKind`, or `InvalidState` if the
    /// signal has not been read yet.
    pub fn sample(&self, handle: Handle) -> Result<f64> {
        let inner = self.inner.lock();
        inner
            .expect_kind(handle, RequestKind::Signal)?
            .value
            .ok_or_else(|| PioError::invalid_state(format!("signal handle {handle} has not been read")))
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Number of registered requests
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no request has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The request registered under `handle`
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle`.
    pub fn request(&self, handle: Handle) -> Result<ValidatedRequest> {
        Ok(self.inner.lock().entry(handle)?.request.clone())
    }

    /// Adjusted value of a control handle not yet written, if any
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or `WrongRequestKind`.
    pub fn pending(&self, handle: Handle) -> Result<Option<f64>> {
        let inner = self.inner.lock();
        let entry = inner.expect_kind(handle, RequestKind::Control)?;
        Ok(entry.value.filter(|_| entry.outstanding))
    }
}
