//! Per-jobsite billable hours.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::allocation::AllocationTable;
use crate::error::BillingError;
use crate::grouping::group_first_seen;
use crate::record::{CostClassifier, TimeRecord};

/// Rates closer than this are the same rate.
const RATE_TOLERANCE: f64 = 1e-9;

/// Billing-ready hours for a single job site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobsiteBillingSummary {
    pub jobsite_id: String,
    pub jobsite_name: String,
    pub customer_name: String,

    /// Sum of non-overhead hours.
    pub direct_hours: f64,

    /// Sum of this job site's overhead shares across all its timesheets.
    pub allocated_overhead_hours: f64,

    /// `direct_hours + allocated_overhead_hours`.
    pub total_billable_hours: f64,

    pub billable_rate: f64,
    pub work_dates: BTreeSet<NaiveDate>,

    /// Timesheets the job site appears in, first-seen order.
    pub timesheet_ids: Vec<String>,
}

/// Builds one summary per distinct job site, in first-seen order.
///
/// Fails if a job site's rows disagree on name or billable rate.
pub fn summarize(
    records: &[TimeRecord],
    allocation: &AllocationTable,
    classifier: &CostClassifier,
) -> Result<Vec<JobsiteBillingSummary>, BillingError> {
    group_first_seen(records, |r| r.jobsite_id.clone())
        .into_iter()
        .map(|(jobsite_id, rows)| summarize_jobsite(jobsite_id, &rows, allocation, classifier))
        .collect()
}

fn summarize_jobsite(
    jobsite_id: String,
    rows: &[&TimeRecord],
    allocation: &AllocationTable,
    classifier: &CostClassifier,
) -> Result<JobsiteBillingSummary, BillingError> {
    // Groups are never empty; every key came from a row.
    let first = rows[0];

    let jobsite_name = uniform_name(&jobsite_id, rows)?;
    let billable_rate = uniform_rate(&jobsite_id, rows, classifier)?;

    let direct_hours: f64 = rows
        .iter()
        .filter(|r| !classifier.is_overhead_record(r))
        .map(|r| r.hours)
        .fold(0.0, |total, hours| total + hours);

    let timesheet_ids: Vec<String> = group_first_seen(rows, |r| r.timesheet_id.clone())
        .into_iter()
        .map(|(timesheet_id, _)| timesheet_id)
        .collect();

    let allocated_overhead_hours: f64 = timesheet_ids
        .iter()
        .filter_map(|timesheet_id| allocation.get(timesheet_id, &jobsite_id))
        .fold(0.0, |total, hours| total + hours);

    let work_dates = rows.iter().filter_map(|r| r.work_date).collect();

    Ok(JobsiteBillingSummary {
        jobsite_name,
        customer_name: first.customer_name.clone(),
        direct_hours,
        allocated_overhead_hours,
        total_billable_hours: direct_hours + allocated_overhead_hours,
        billable_rate,
        work_dates,
        timesheet_ids,
        jobsite_id,
    })
}

fn uniform_name(jobsite_id: &str, rows: &[&TimeRecord]) -> Result<String, BillingError> {
    let first = &rows[0].jobsite_name;
    if let Some(conflict) = rows.iter().find(|r| r.jobsite_name != *first) {
        return Err(BillingError::DataConsistency {
            jobsite_id: jobsite_id.to_string(),
            field: "jobsite name",
            first: first.clone(),
            conflicting: conflict.jobsite_name.clone(),
        });
    }
    Ok(first.clone())
}

/// The billable rate shared by the job site's direct rows.
///
/// Drive-time rows may carry an internal rate of their own, so they only
/// count when the job site has no direct rows at all.
fn uniform_rate(
    jobsite_id: &str,
    rows: &[&TimeRecord],
    classifier: &CostClassifier,
) -> Result<f64, BillingError> {
    let direct: Vec<&TimeRecord> = rows
        .iter()
        .copied()
        .filter(|r| !classifier.is_overhead_record(r))
        .collect();
    let candidates: &[&TimeRecord] = if direct.is_empty() { rows } else { &direct };

    let rate = candidates[0].billable_rate;
    if let Some(conflict) = candidates
        .iter()
        .find(|r| (r.billable_rate - rate).abs() > RATE_TOLERANCE)
    {
        return Err(BillingError::DataConsistency {
            jobsite_id: jobsite_id.to_string(),
            field: "billable rate",
            first: rate.to_string(),
            conflicting: conflict.billable_rate.to_string(),
        });
    }
    Ok(rate)
}
