//! End-to-end billing run: records in, ordered invoice drafts out.

use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::allocation::allocate_overhead;
use crate::error::BillingError;
use crate::invoice::{InvoiceDraft, InvoicePolicy, assemble_from_matching};
use crate::record::{CostClassifier, ServiceRecord, TimeRecord, validate_records};
use crate::summary::{JobsiteBillingSummary, summarize};

/// Configuration for a billing run.
#[derive(Debug, Clone, Default)]
pub struct BillingConfig {
    pub classifier: CostClassifier,
    pub policy: InvoicePolicy,
}

/// Validates records and computes one summary per job site.
pub fn summaries_for(
    time: &[TimeRecord],
    services: &[ServiceRecord],
    config: &BillingConfig,
) -> Result<Vec<JobsiteBillingSummary>, BillingError> {
    validate_records(time, services)?;
    let allocation = allocate_overhead(time, &config.classifier);
    let summaries = summarize(time, &allocation, &config.classifier)?;
    tracing::debug!(
        timesheets = allocation.timesheets().len(),
        jobsites = summaries.len(),
        "computed jobsite summaries"
    );
    Ok(summaries)
}

/// Builds every invoice for the run, in first-seen job-site order.
///
/// Job sites with nothing to bill are omitted. Service records whose job
/// site never appears in the time records are not invoiced.
pub fn build_invoices(
    time: &[TimeRecord],
    services: &[ServiceRecord],
    invoice_date: NaiveDate,
    config: &BillingConfig,
) -> Result<Vec<InvoiceDraft>, BillingError> {
    let summaries = summaries_for(time, services, config)?;

    let mut by_jobsite: HashMap<&str, Vec<&ServiceRecord>> = HashMap::new();
    for service in services {
        by_jobsite
            .entry(service.jobsite_id.as_str())
            .or_default()
            .push(service);
    }

    // Each job site is independent; the indexed collect keeps summary order.
    let drafts: Vec<Option<InvoiceDraft>> = summaries
        .par_iter()
        .map(|summary| {
            let matching = by_jobsite
                .get(summary.jobsite_id.as_str())
                .map_or(&[][..], Vec::as_slice);
            assemble_from_matching(summary, matching, invoice_date, &config.policy)
        })
        .collect();

    let invoices: Vec<InvoiceDraft> = drafts.into_iter().flatten().collect();
    tracing::debug!(
        jobsites = summaries.len(),
        invoices = invoices.len(),
        "assembled invoices"
    );
    Ok(invoices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::LineKind;
    use crate::money::Money;
    use crate::record::fixtures::{service, time};

    fn invoice_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()
    }

    fn run(time: &[TimeRecord], services: &[ServiceRecord]) -> Vec<InvoiceDraft> {
        build_invoices(time, services, invoice_date(), &BillingConfig::default()).unwrap()
    }

    #[test]
    fn full_run_allocates_and_bills() {
        let time = vec![
            time("T1", "A", "200", 3.0),
            time("T1", "B", "200", 1.0),
            time("T1", "A", "900", 2.0),
        ];
        let services = vec![service("A", "Mulch", 50.0)];

        let invoices = run(&time, &services);

        assert_eq!(invoices.len(), 2);
        let a = &invoices[0];
        assert_eq!(a.jobsite_id, "A");
        assert_eq!(a.line_items[0].quantity, 4.0);
        assert_eq!(a.subtotal, Money::from_cents(13_000));
        assert_eq!(a.total, Money::from_cents(14_300));
        let b = &invoices[1];
        assert_eq!(b.jobsite_id, "B");
        assert_eq!(b.line_items[0].quantity, 2.0);
        assert_eq!(b.subtotal, Money::from_cents(4_000));
        assert_eq!(b.fee_amount, Money::from_cents(400));
    }

    #[test]
    fn skips_jobsites_without_billable_amounts() {
        let time = vec![time("T1", "A", "200", 2.0), time("T2", "Z", "200", 0.0)];

        let invoices = run(&time, &[]);

        let ids: Vec<&str> = invoices.iter().map(|i| i.jobsite_id.as_str()).collect();
        assert_eq!(ids, vec!["A"]);
    }

    #[test]
    fn services_for_unknown_jobsites_are_ignored() {
        let time = vec![time("T1", "A", "200", 1.0)];
        let services = vec![service("Q", "Stray", 100.0)];

        let invoices = run(&time, &services);

        assert_eq!(invoices.len(), 1);
        assert!(
            invoices[0]
                .line_items
                .iter()
                .all(|l| l.kind != LineKind::Service)
        );
    }

    #[test]
    fn repeated_runs_are_identical() {
        let mut records: Vec<TimeRecord> = Vec::new();
        for ts in 0..20 {
            let timesheet = format!("T{ts}");
            for site in ["C", "A", "B", "D"] {
                records.push(time(&timesheet, site, "200", 1.25));
            }
            records.push(time(&timesheet, "A", "900", 0.5));
        }
        let services = vec![service("B", "Mulch", 12.5), service("D", "Stone", 80.0)];

        let first = run(&records, &services);
        let second = run(&records, &services);

        assert_eq!(first, second);
        let order: Vec<&str> = first.iter().map(|i| i.jobsite_id.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B", "D"]);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn negative_hours_fail_the_run() {
        let time = vec![time("T1", "A", "200", 1.0), time("T1", "B", "900", -2.0)];

        let err = build_invoices(&time, &[], invoice_date(), &BillingConfig::default()).unwrap_err();

        assert!(matches!(err, BillingError::NegativeValue { field: "hours", .. }));
    }

    #[test]
    fn rate_mismatch_fails_the_run() {
        let mut time = vec![time("T1", "A", "200", 1.0), time("T2", "A", "200", 1.0)];
        time[1].billable_rate = 30.0;

        let err = build_invoices(&time, &[], invoice_date(), &BillingConfig::default()).unwrap_err();

        assert!(matches!(err, BillingError::DataConsistency { .. }));
    }
}
