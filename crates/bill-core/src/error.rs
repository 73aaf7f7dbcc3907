//! Errors raised by the billing engine.

use std::fmt;

use thiserror::Error;

/// Which kind of input record a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Time,
    Service,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Billing engine errors.
///
/// Any of these aborts the whole computation. The caller decides whether to
/// fix the export and rerun, or to drop the affected job site.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BillingError {
    /// Records of one job site disagree on a value that must be uniform.
    #[error("jobsite {jobsite_id} has conflicting {field}: {first:?} vs {conflicting:?}")]
    DataConsistency {
        jobsite_id: String,
        field: &'static str,
        first: String,
        conflicting: String,
    },

    /// A quantity that must be non-negative was negative (or not a number).
    #[error(
        "{record} record (timesheet {timesheet_id}, jobsite {jobsite_id}) has invalid {field}: {value}"
    )]
    NegativeValue {
        record: RecordKind,
        timesheet_id: String,
        jobsite_id: String,
        field: &'static str,
        value: f64,
    },

    /// The drive-time marker is blank and would match every cost code.
    #[error("overhead cost code marker must not be blank (got {value:?})")]
    InvalidOverheadCode { value: String },
}
