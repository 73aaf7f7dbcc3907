//! Input records: labor time entries and service/material charges.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::error::{BillingError, RecordKind};

/// Default cost-code marker for drive time / overhead labor.
pub const DEFAULT_OVERHEAD_CODE: &str = "900";

/// One labor entry from the time export.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRecord {
    pub timesheet_id: String,
    pub jobsite_id: String,
    pub jobsite_name: String,
    pub customer_name: String,
    /// Free-text task name, informational only.
    pub task_name: String,
    /// Cost code, e.g. `"200 Grounds Maintenance"` or `"900 Unbillable/Overhead"`.
    pub cost_code: String,
    pub hours: f64,
    pub billable_rate: f64,
    pub work_date: Option<NaiveDate>,
}

/// One material/service charge from the service export.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub timesheet_id: String,
    pub jobsite_id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
    pub invoice_type: InvoiceType,
    pub already_invoiced: bool,
    pub work_date: Option<NaiveDate>,
}

impl ServiceRecord {
    /// Whether this charge belongs on an invoice: positive price, not
    /// covered by the contract, and not invoiced before.
    pub fn is_billable(&self) -> bool {
        self.total_price > 0.0 && !self.invoice_type.is_included() && !self.already_invoiced
    }
}

/// Invoice type of a service charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceType {
    /// Already covered by the contract price; never billed separately.
    Included,
    /// Any other export value, kept verbatim.
    Other(String),
}

impl InvoiceType {
    pub const fn is_included(&self) -> bool {
        matches!(self, Self::Included)
    }
}

impl FromStr for InvoiceType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("included") {
            Ok(Self::Included)
        } else {
            Ok(Self::Other(trimmed.to_string()))
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Included => write!(f, "Included"),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

/// Classifies time records as overhead (drive time) or direct labor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostClassifier {
    overhead_code: String,
}

impl Default for CostClassifier {
    fn default() -> Self {
        Self {
            overhead_code: DEFAULT_OVERHEAD_CODE.to_string(),
        }
    }
}

impl CostClassifier {
    /// Creates a classifier for the given marker.
    ///
    /// A blank marker would match every cost code, so it is rejected.
    pub fn new(overhead_code: impl Into<String>) -> Result<Self, BillingError> {
        let overhead_code = overhead_code.into();
        if overhead_code.trim().is_empty() {
            return Err(BillingError::InvalidOverheadCode {
                value: overhead_code,
            });
        }
        Ok(Self { overhead_code })
    }

    /// Cost codes containing the overhead marker are drive time.
    pub fn is_overhead(&self, cost_code: &str) -> bool {
        cost_code.contains(self.overhead_code.as_str())
    }

    pub fn is_overhead_record(&self, record: &TimeRecord) -> bool {
        self.is_overhead(&record.cost_code)
    }
}

/// Rejects records carrying negative or non-finite quantities.
///
/// Runs before allocation so a bad row can never be averaged into a split.
pub fn validate_records(
    time: &[TimeRecord],
    services: &[ServiceRecord],
) -> Result<(), BillingError> {
    for record in time {
        for (field, value) in [
            ("hours", record.hours),
            ("billable rate", record.billable_rate),
        ] {
            check_non_negative(
                RecordKind::Time,
                &record.timesheet_id,
                &record.jobsite_id,
                field,
                value,
            )?;
        }
    }

    for record in services {
        for (field, value) in [
            ("quantity", record.quantity),
            ("unit price", record.unit_price),
            ("total price", record.total_price),
        ] {
            check_non_negative(
                RecordKind::Service,
                &record.timesheet_id,
                &record.jobsite_id,
                field,
                value,
            )?;
        }
    }

    Ok(())
}

fn check_non_negative(
    record: RecordKind,
    timesheet_id: &str,
    jobsite_id: &str,
    field: &'static str,
    value: f64,
) -> Result<(), BillingError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(BillingError::NegativeValue {
        record,
        timesheet_id: timesheet_id.to_string(),
        jobsite_id: jobsite_id.to_string(),
        field,
        value,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn time(timesheet: &str, jobsite: &str, cost_code: &str, hours: f64) -> TimeRecord {
        TimeRecord {
            timesheet_id: timesheet.to_string(),
            jobsite_id: jobsite.to_string(),
            jobsite_name: format!("Site {jobsite}"),
            customer_name: format!("Customer {jobsite}"),
            task_name: String::new(),
            cost_code: cost_code.to_string(),
            hours,
            billable_rate: 20.0,
            work_date: NaiveDate::from_ymd_opt(2026, 1, 5),
        }
    }

    pub fn service(jobsite: &str, description: &str, total_price: f64) -> ServiceRecord {
        ServiceRecord {
            timesheet_id: "T1".to_string(),
            jobsite_id: jobsite.to_string(),
            description: description.to_string(),
            quantity: 1.0,
            unit_price: total_price,
            total_price,
            invoice_type: InvoiceType::Other("Fixed".to_string()),
            already_invoiced: false,
            work_date: NaiveDate::from_ymd_opt(2026, 1, 5),
        }
    }
}
