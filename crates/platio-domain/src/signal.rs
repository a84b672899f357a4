//! How signal samples are combined, printed and expected to evolve.

use std::fmt;

/// Whether a request reads a signal or writes a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Read-only telemetry.
    Signal,
    /// Writable setting.
    Control,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => f.write_str("signal"),
            Self::Control => f.write_str("control"),
        }
    }
}

/// Reduction used when a signal is read at a domain coarser than its native
/// one (e.g. a per-CPU frequency read at package scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Sum of all samples.
    Sum,
    /// Arithmetic mean.
    Average,
    /// Median (mean of the middle two for even counts).
    Median,
    /// Smallest sample.
    Min,
    /// Largest sample.
    Max,
    /// 1.0 if every sample is non-zero.
    LogicalAnd,
    /// 1.0 if any sample is non-zero.
    LogicalOr,
    /// First sample.
    SelectFirst,
    /// The common value, or NaN if samples disagree.
    ExpectSame,
}

impl Aggregation {
    /// Combine `samples`. An empty slice yields NaN.
    #[must_use]
    pub fn apply(self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return f64::NAN;
        }
        match self {
            Self::Sum => samples.iter().sum(),
            #[allow(clippy::cast_precision_loss)]
            Self::Average => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::LogicalAnd => bool_to_f64(samples.iter().all(|&s| s != 0.0)),
            Self::LogicalOr => bool_to_f64(samples.iter().any(|&s| s != 0.0)),
            Self::SelectFirst => samples[0],
            Self::ExpectSame => {
                let first = samples[0];
                if samples.iter().all(|&s| s == first) {
                    first
                } else {
                    f64::NAN
                }
            }
        }
    }

    /// Canonical name (`"average"`, `"logical_and"`, ...).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::LogicalAnd => "logical_and",
            Self::LogicalOr => "logical_or",
            Self::SelectFirst => "select_first",
            Self::ExpectSame => "expect_same",
        }
    }
}

const fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Native representation of a signal sample, used when printing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Floating point, shortest round-trip form.
    Double,
    /// Rounded to the nearest integer.
    Integer,
    /// Unsigned 64-bit hexadecimal (`0x...`).
    Hex,
    /// The raw bit pattern of the double, in hexadecimal.
    Raw64,
}

impl Format {
    /// Render `value` in this format.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn format(self, value: f64) -> String {
        match self {
            Self::Double => format!("{value}"),
            Self::Integer => {
                if value.is_finite() {
                    format!("{}", value.round() as i64)
                } else {
                    format!("{value}")
                }
            }
            Self::Hex => format!("0x{:016x}", value as u64),
            Self::Raw64 => format!("0x{:016x}", value.to_bits()),
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Integer => "integer",
            Self::Hex => "hex",
            Self::Raw64 => "raw64",
        }
    }
}

/// How a signal is expected to change over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    /// Never changes while the node is up.
    Constant,
    /// Only ever increases (counters, accumulated energy).
    Monotone,
    /// Changes arbitrarily.
    Variable,
    /// Encodes a label, not a quantity.
    Label,
}

impl Behavior {
    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Monotone => "monotone",
            Self::Variable => "variable",
            Self::Label => "label",
        }
    }
}
