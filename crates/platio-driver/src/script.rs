//! Batch request scripts
//!
//! One request per line:
//!
//! ```text
//! # NAME                DOMAIN   INDEX  [VALUE]
//! CPU_ENERGY            package  0
//! POWER_LIMIT           package  1      140
//! ```
//!
//! A line without a value reads a signal, a line with a value writes a
//! control. The domain may be given by name or by integer value. Blank
//! lines and lines starting with `#` are ignored.
//!
//! [`run_batch`] registers every line in one [`BatchSession`](crate::batch::BatchSession),
//! applies all adjustments, reads all signals and commits once. A failing
//! read is reported against its own line and never holds back the commit.

use platio_domain::{DomainRef, RequestKind};
use tracing::{debug, warn};

use crate::batch::Handle;
use crate::error::{HandleFailure, PioError, Result};
use crate::pio::PlatformIo;
use crate::validate::ValidatedRequest;

/// One parsed script line
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLine {
    /// 1-based line number
    pub line: usize,
    /// Signal or control name
    pub name: String,
    /// Domain as written
    pub domain: DomainRef,
    /// Domain index as written
    pub index: i64,
    /// Value to write; `None` for a read
    pub value: Option<f64>,
}

impl RequestLine {
    /// Signal for reads, control for writes
    pub const fn kind(&self) -> RequestKind {
        if self.value.is_some() {
            RequestKind::Control
        } else {
            RequestKind::Signal
        }
    }
}

/// Parse one script line
///
/// Returns `Ok(None)` for blank and comment lines.
///
/// # Errors
///
/// Returns `MalformedRequest` for a wrong token count, a non-integer index
/// or a non-numeric value.
pub fn parse_line(line: usize, text: &str) -> Result<Option<RequestLine>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (name, domain, index, value) = match tokens.as_slice() {
        [name, domain, index] => (*name, *domain, *index, None),
        [name, domain, index, value] => (*name, *domain, *index, Some(*value)),
        _ => {
            return Err(PioError::malformed(
                line,
                format!(
                    "expected NAME DOMAIN_TYPE DOMAIN_INDEX [VALUE], found {} fields",
                    tokens.len()
                ),
            ))
        }
    };

    let index = index
        .parse::<i64>()
        .map_err(|_| PioError::malformed(line, format!("domain index {index:?} is not an integer")))?;
    let value = value
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| PioError::malformed(line, format!("value {v:?} is not a number")))
        })
        .transpose()?;
    let domain = domain
        .parse::<i64>()
        .map_or_else(|_| DomainRef::from(domain), DomainRef::Index);

    Ok(Some(RequestLine {
        line,
        name: name.to_string(),
        domain,
        index,
        value,
    }))
}

/// How failing lines are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Report each failing line and run the rest
    #[default]
    PerLine,
    /// Abort the whole script on the first failing line, before any
    /// control is written
    Strict,
}

/// A signal read by the script
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// Script line
    pub line: usize,
    /// Validated request
    pub request: ValidatedRequest,
    /// Sampled value
    pub value: f64,
}

/// A control written (or attempted) by the script
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// Script line
    pub line: usize,
    /// Session handle
    pub handle: Handle,
    /// Validated request
    pub request: ValidatedRequest,
    /// Value adjusted
    pub value: f64,
}

/// Outcome of [`run_batch`]
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Lines that failed to parse or validate, with the reason
    pub rejected: Vec<(usize, PioError)>,
    /// Signal lines whose backend read failed, with the reason
    pub unread: Vec<(usize, PioError)>,
    /// Signals read, in script order
    pub reads: Vec<ReadResult>,
    /// Controls adjusted, in script order
    pub writes: Vec<WriteResult>,
    /// Writes applied by the commit
    pub applied: usize,
    /// Writes the backend refused during the commit
    pub failed: Vec<HandleFailure>,
}

impl BatchReport {
    /// Whether every line was accepted, every signal read and every write
    /// applied
    pub fn is_success(&self) -> bool {
        self.rejected.is_empty() && self.unread.is_empty() && self.failed.is_empty()
    }
}

/// Run a batch script against `pio`
///
/// # Errors
///
/// In [`BatchMode::Strict`], returns the first parse or validation error,
/// before any backend access. Once the backend is touched nothing aborts:
/// read failures land in [`BatchReport::unread`] and commit failures in
/// [`BatchReport::failed`], and the commit is always issued.
pub fn run_batch(pio: &PlatformIo, input: &str, mode: BatchMode) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    let reject = |report: &mut BatchReport, line: usize, err: PioError| -> Result<()> {
        if mode == BatchMode::Strict {
            return Err(err);
        }
        warn!("Skipping line {line}: {err}");
        report.rejected.push((line, err));
        Ok(())
    };

    let mut lines = Vec::new();
    for (i, text) in input.lines().enumerate() {
        match parse_line(i + 1, text) {
            Ok(Some(line)) => lines.push(line),
            Ok(None) => {}
            Err(e) => reject(&mut report, i + 1, e)?,
        }
    }

    let session = pio.session();
    let mut signals = Vec::new();
    let mut controls = Vec::new();
    for line in lines {
        let pushed = pio
            .validate(&line.name, line.domain.clone(), line.index, line.kind())
            .and_then(|request| Ok((session.push(request.clone())?, request)));
        match pushed {
            Ok((handle, request)) => match line.value {
                Some(value) => controls.push((line.line, handle, request, value)),
                None => signals.push((line.line, handle, request)),
            },
            Err(e) => reject(&mut report, line.line, e)?,
        }
    }

    for (line, handle, request, value) in controls {
        session.adjust(handle, value)?;
        report.writes.push(WriteResult {
            line,
            handle,
            request,
            value,
        });
    }

    if !signals.is_empty() {
        let batched = session.read_all();
        if let Err(e) = &batched {
            warn!("Batched read failed ({e}); reading signals one by one");
        }
        for (line, handle, request) in signals {
            let value = if batched.is_ok() {
                session.sample(handle)
            } else {
                session.read(handle)
            };
            match value {
                Ok(value) => report.reads.push(ReadResult {
                    line,
                    request,
                    value,
                }),
                Err(e) => {
                    warn!("Cannot read line {line}: {e}");
                    report.unread.push((line, e));
                }
            }
        }
    }

    match session.commit() {
        Ok(applied) => report.applied = applied,
        Err(PioError::PartialCommitFailure { failed, applied }) => {
            report.applied = applied;
            report.failed = failed;
        }
        Err(e) => return Err(e),
    }

    debug!(
        "batch: {} reads, {} writes applied, {} rejected, {} unread, {} failed",
        report.reads.len(),
        report.applied,
        report.rejected.len(),
        report.unread.len(),
        report.failed.len()
    );
    Ok(report)
}
