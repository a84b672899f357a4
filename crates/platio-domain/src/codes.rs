//! Backend error codes.
//!
//! Backends report failures as negative integers. The core never branches on
//! a particular value; it only checks the sign and asks the backend for a
//! message. The numbering is stable, so a backend wrapping a native library
//! with the same convention can pass codes through unchanged.
//!
//! ```text
//!  -1  RUNTIME               -8  MSR_OPEN
//!  -2  LOGIC                 -9  MSR_READ
//!  -3  INVALID              -10  MSR_WRITE
//!  -4  FILE_PARSE           -11  AGENT_UNSUPPORTED
//!  -5  LEVEL_RANGE          -12  AFFINITY
//!  -6  NOT_IMPLEMENTED      -13  NO_AGENT
//!  -7  PLATFORM_UNSUPPORTED -14  DATA_STORE
//! ```

// ── Generic ──────────────────────────────────────────────────────────────────

/// Generic runtime failure.
pub const ERROR_RUNTIME: i32 = -1;
/// Internal logic error.
pub const ERROR_LOGIC: i32 = -2;
/// Invalid argument.
pub const ERROR_INVALID: i32 = -3;
/// Failed to parse an input file.
pub const ERROR_FILE_PARSE: i32 = -4;
/// Control hierarchy level out of range.
pub const ERROR_LEVEL_RANGE: i32 = -5;
/// Feature not implemented by this backend.
pub const ERROR_NOT_IMPLEMENTED: i32 = -6;
/// Platform not supported.
pub const ERROR_PLATFORM_UNSUPPORTED: i32 = -7;

// ── Register access ──────────────────────────────────────────────────────────

/// Could not open a register device file.
pub const ERROR_MSR_OPEN: i32 = -8;
/// Register read failed.
pub const ERROR_MSR_READ: i32 = -9;
/// Register write failed.
pub const ERROR_MSR_WRITE: i32 = -10;

// ── Runtime services ─────────────────────────────────────────────────────────

/// Agent not supported.
pub const ERROR_AGENT_UNSUPPORTED: i32 = -11;
/// CPU affinity could not be determined.
pub const ERROR_AFFINITY: i32 = -12;
/// No agent specified.
pub const ERROR_NO_AGENT: i32 = -13;
/// Data store failure.
pub const ERROR_DATA_STORE: i32 = -14;

/// Default human-readable text for a backend code.
///
/// Unknown negative codes fall back to a generic message; non-negative values
/// are not errors.
#[must_use]
pub fn message(code: i32) -> &'static str {
    match code {
        ERROR_RUNTIME => "runtime error",
        ERROR_LOGIC => "logic error",
        ERROR_INVALID => "invalid argument",
        ERROR_FILE_PARSE => "unable to parse input file",
        ERROR_LEVEL_RANGE => "control hierarchy level is out of range",
        ERROR_NOT_IMPLEMENTED => "feature not yet implemented",
        ERROR_PLATFORM_UNSUPPORTED => "current platform not supported or unrecognized",
        ERROR_MSR_OPEN => "could not open MSR device",
        ERROR_MSR_READ => "could not read from MSR device",
        ERROR_MSR_WRITE => "could not write to MSR device",
        ERROR_AGENT_UNSUPPORTED => "specified agent not supported",
        ERROR_AFFINITY => "MPI ranks are not affinitized to distinct CPUs",
        ERROR_NO_AGENT => "requested agent is unavailable or invalid",
        ERROR_DATA_STORE => "encountered a data store error",
        c if c < 0 => "unknown backend error",
        _ => "success",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            ERROR_RUNTIME,
            ERROR_LOGIC,
            ERROR_INVALID,
            ERROR_FILE_PARSE,
            ERROR_LEVEL_RANGE,
            ERROR_NOT_IMPLEMENTED,
            ERROR_PLATFORM_UNSUPPORTED,
            ERROR_MSR_OPEN,
            ERROR_MSR_READ,
            ERROR_MSR_WRITE,
            ERROR_AGENT_UNSUPPORTED,
            ERROR_AFFINITY,
            ERROR_NO_AGENT,
            ERROR_DATA_STORE,
        ];
        for (i, code) in all.iter().enumerate() {
            assert!(*code < 0);
            assert_eq!(*code, -(i as i32) - 1);
        }
    }

    #[test]
    fn unknown_codes_still_get_a_message() {
        assert_eq!(message(-999), "unknown backend error");
        assert_eq!(message(0), "success");
        assert_eq!(message(ERROR_MSR_WRITE), "could not write to MSR device");
    }
}
