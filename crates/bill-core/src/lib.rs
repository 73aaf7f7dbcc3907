//! Billing engine for jobsite invoicing.
//!
//! This crate turns labor and service records exported from the field
//! platform into draft invoices:
//! - Allocation: splitting each timesheet's drive time across its job sites
//! - Summaries: billable hours, rate, and work dates per job site
//! - Invoices: labor, service, and direct-payment fee lines with totals
//!
//! Everything here is pure. File parsing, persistence, and the accounting
//! API live in the surrounding crates.

mod allocation;
mod engine;
mod error;
mod fee;
mod grouping;
mod invoice;
mod money;
mod record;
mod summary;

pub use allocation::{AllocationShare, AllocationTable, TimesheetAllocation, allocate_overhead};
pub use engine::{BillingConfig, build_invoices, summaries_for};
pub use error::{BillingError, RecordKind};
pub use fee::{FeeSchedule, direct_payment_fee};
pub use invoice::{
    DEFAULT_FEE_LABEL, DEFAULT_LABOR_LABEL, InvoiceDraft, InvoicePolicy, LineItem, LineKind,
    assemble_invoice, format_date_short, format_labor_description, labor_line, service_lines,
};
pub use money::Money;
pub use record::{
    CostClassifier, DEFAULT_OVERHEAD_CODE, InvoiceType, ServiceRecord, TimeRecord,
    validate_records,
};
pub use summary::{JobsiteBillingSummary, summarize};
