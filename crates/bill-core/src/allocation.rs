//! Drive-time allocation.
//!
//! Drive time and other overhead labor is recorded against whichever job
//! site the crew happened to log it on. Before billing, each timesheet's
//! overhead is spread across every job site that timesheet touched.
//!
//! # Algorithm Summary
//!
//! 1. Partition time records by timesheet (first-seen order)
//! 2. Sum the overhead hours of each timesheet
//! 3. Give every distinct job site in the timesheet an equal share, including
//!    job sites whose only rows in that timesheet are overhead
//!
//! The split is deliberately equal rather than weighted by hours worked.

use std::collections::HashMap;

use crate::grouping::group_first_seen;
use crate::record::{CostClassifier, TimeRecord};

/// Overhead allocated to one job site within one timesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationShare {
    pub jobsite_id: String,
    pub hours: f64,
}

/// Overhead split for a single timesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct TimesheetAllocation {
    pub timesheet_id: String,

    /// Total overhead hours recorded on the timesheet.
    pub overhead_hours: f64,

    /// One share per distinct job site, in first-seen order.
    pub shares: Vec<AllocationShare>,
}

/// Allocated overhead keyed by `(timesheet_id, jobsite_id)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationTable {
    timesheets: Vec<TimesheetAllocation>,
    index: HashMap<String, usize>,
}

impl AllocationTable {
    /// Allocated hours for a job site within a timesheet.
    ///
    /// Every job site that appears in a timesheet has an entry, even when the
    /// timesheet carried no overhead.
    pub fn get(&self, timesheet_id: &str, jobsite_id: &str) -> Option<f64> {
        let allocation = &self.timesheets[*self.index.get(timesheet_id)?];
        allocation
            .shares
            .iter()
            .find(|share| share.jobsite_id == jobsite_id)
            .map(|share| share.hours)
    }

    /// Per-timesheet allocations in first-seen order.
    pub fn timesheets(&self) -> &[TimesheetAllocation] {
        &self.timesheets
    }

    pub fn timesheet(&self, timesheet_id: &str) -> Option<&TimesheetAllocation> {
        self.index.get(timesheet_id).map(|&idx| &self.timesheets[idx])
    }

    /// Sum of a job site's shares across every timesheet.
    pub fn total_for_jobsite(&self, jobsite_id: &str) -> f64 {
        self.timesheets
            .iter()
            .flat_map(|t| t.shares.iter())
            .filter(|share| share.jobsite_id == jobsite_id)
            .map(|share| share.hours)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.timesheets.is_empty()
    }

    fn push(&mut self, allocation: TimesheetAllocation) {
        self.index
            .insert(allocation.timesheet_id.clone(), self.timesheets.len());
        self.timesheets.push(allocation);
    }
}

/// Splits each timesheet's overhead hours equally across its job sites.
///
/// Records are expected to have passed [`validate_records`](crate::validate_records);
/// negative hours would otherwise leak into the split.
pub fn allocate_overhead(records: &[TimeRecord], classifier: &CostClassifier) -> AllocationTable {
    let mut table = AllocationTable::default();

    for (timesheet_id, rows) in group_first_seen(records, |r| r.timesheet_id.clone()) {
        let overhead_hours: f64 = rows
            .iter()
            .filter(|r| classifier.is_overhead_record(r))
            .map(|r| r.hours)
            .sum();

        let jobsites: Vec<String> = group_first_seen(&rows, |r| r.jobsite_id.clone())
            .into_iter()
            .map(|(jobsite_id, _)| jobsite_id)
            .collect();

        if jobsites.is_empty() {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let per_jobsite = overhead_hours / jobsites.len() as f64;

        tracing::trace!(
            timesheet_id = %timesheet_id,
            overhead_hours,
            jobsites = jobsites.len(),
            per_jobsite,
            "allocated overhead"
        );

        table.push(TimesheetAllocation {
            timesheet_id,
            overhead_hours,
            shares: jobsites
                .into_iter()
                .map(|jobsite_id| AllocationShare {
                    jobsite_id,
                    hours: per_jobsite,
                })
                .collect(),
        });
    }

    table
}
