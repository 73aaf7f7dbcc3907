//! Invoice assembly.
//!
//! Line order is fixed: labor first, then billable service charges in
//! export order, then the direct-payment fee computed from everything above.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fee::FeeSchedule;
use crate::money::Money;
use crate::record::ServiceRecord;
use crate::summary::JobsiteBillingSummary;

pub const DEFAULT_LABOR_LABEL: &str = "Skilled Garden Hourly Labor";
pub const DEFAULT_FEE_LABEL: &str = "Please subtract if paying by USPS check";

/// What a line item bills for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Labor,
    Service,
    Fee,
}

/// A single invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineKind,
    pub description: String,
    pub quantity: f64,
    pub unit_rate: f64,
    pub amount: Money,
}

/// A draft invoice for one job site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub jobsite_id: String,
    pub jobsite_name: String,
    pub customer_name: String,
    pub invoice_date: NaiveDate,
    pub line_items: Vec<LineItem>,

    /// Labor plus service amounts, fee excluded.
    pub subtotal: Money,
    pub fee_amount: Money,
    pub total: Money,

    pub timesheet_ids: Vec<String>,
    pub work_dates: BTreeSet<NaiveDate>,
}

/// Labels and fee tiers applied while assembling invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePolicy {
    pub labor_label: String,
    pub fee_label: String,
    pub fee_schedule: FeeSchedule,
}

impl Default for InvoicePolicy {
    fn default() -> Self {
        Self {
            labor_label: DEFAULT_LABOR_LABEL.to_string(),
            fee_label: DEFAULT_FEE_LABEL.to_string(),
            fee_schedule: FeeSchedule::default(),
        }
    }
}

/// Builds the invoice for one job site.
///
/// `services` may hold records for any job site; only this job site's
/// billable charges are used. Returns `None` when there is nothing to bill.
pub fn assemble_invoice(
    summary: &JobsiteBillingSummary,
    services: &[ServiceRecord],
    invoice_date: NaiveDate,
    policy: &InvoicePolicy,
) -> Option<InvoiceDraft> {
    let matching: Vec<&ServiceRecord> = services
        .iter()
        .filter(|s| s.jobsite_id == summary.jobsite_id)
        .collect();
    assemble_from_matching(summary, &matching, invoice_date, policy)
}

/// Same as [`assemble_invoice`] for services already narrowed to the job site.
pub(crate) fn assemble_from_matching(
    summary: &JobsiteBillingSummary,
    services: &[&ServiceRecord],
    invoice_date: NaiveDate,
    policy: &InvoicePolicy,
) -> Option<InvoiceDraft> {
    let mut line_items: Vec<LineItem> = Vec::new();

    if let Some(labor) = labor_line(summary, &policy.labor_label) {
        line_items.push(labor);
    }
    line_items.extend(service_lines(services));

    if line_items.is_empty() {
        return None;
    }

    let subtotal: Money = line_items.iter().map(|item| item.amount).sum();
    let fee_amount = policy.fee_schedule.fee_for(subtotal);
    if !fee_amount.is_zero() {
        line_items.push(fee_line(&policy.fee_label, fee_amount));
    }

    Some(InvoiceDraft {
        jobsite_id: summary.jobsite_id.clone(),
        jobsite_name: summary.jobsite_name.clone(),
        customer_name: summary.customer_name.clone(),
        invoice_date,
        line_items,
        subtotal,
        fee_amount,
        total: subtotal + fee_amount,
        timesheet_ids: summary.timesheet_ids.clone(),
        work_dates: summary.work_dates.clone(),
    })
}

/// Labor line for the summary's billable hours, if any survive rounding.
///
/// Hours are billed to two decimals and the amount rounded to the cent.
pub fn labor_line(summary: &JobsiteBillingSummary, label: &str) -> Option<LineItem> {
    let quantity = round_hours(summary.total_billable_hours);
    if quantity <= 0.0 {
        return None;
    }
    Some(LineItem {
        kind: LineKind::Labor,
        description: format_labor_description(label, &summary.work_dates),
        quantity,
        unit_rate: summary.billable_rate,
        amount: Money::from_dollars(quantity * summary.billable_rate),
    })
}

/// One line per billable charge; the amount is the export's total price.
pub fn service_lines(services: &[&ServiceRecord]) -> Vec<LineItem> {
    services
        .iter()
        .filter(|s| s.is_billable())
        .map(|s| LineItem {
            kind: LineKind::Service,
            description: s.description.clone(),
            quantity: s.quantity,
            unit_rate: s.unit_price,
            amount: Money::from_dollars(s.total_price),
        })
        .collect()
}

fn fee_line(label: &str, fee: Money) -> LineItem {
    LineItem {
        kind: LineKind::Fee,
        description: label.to_string(),
        quantity: 1.0,
        unit_rate: fee.as_dollars(),
        amount: fee,
    }
}

fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

/// `"<label> 1/05"` for one day, `"<label> 1/05-1/07"` for a range.
pub fn format_labor_description(label: &str, dates: &BTreeSet<NaiveDate>) -> String {
    let range = match (dates.first(), dates.last()) {
        (Some(first), Some(last)) if first == last => format_date_short(*first),
        (Some(first), Some(last)) => {
            format!("{}-{}", format_date_short(*first), format_date_short(*last))
        }
        _ => return label.to_string(),
    };
    format!("{label} {range}")
}

/// Formats a date as `M/DD`, e.g. `1/05`.
pub fn format_date_short(date: NaiveDate) -> String {
    date.format("%-m/%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InvoiceType;
    use crate::record::fixtures::service;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn summary(jobsite: &str, hours: f64, rate: f64) -> JobsiteBillingSummary {
        JobsiteBillingSummary {
            jobsite_id: jobsite.to_string(),
            jobsite_name: format!("Site {jobsite}"),
            customer_name: format!("Customer {jobsite}"),
            direct_hours: hours,
            allocated_overhead_hours: 0.0,
            total_billable_hours: hours,
            billable_rate: rate,
            work_dates: BTreeSet::from([date(2026, 1, 5)]),
            timesheet_ids: vec!["T1".to_string()],
        }
    }

    fn assemble(
        summary: &JobsiteBillingSummary,
        services: &[ServiceRecord],
    ) -> Option<InvoiceDraft> {
        assemble_invoice(summary, services, date(2026, 1, 31), &InvoicePolicy::default())
    }

    #[test]
    fn labor_and_service_scenario() {
        let invoice = assemble(&summary("A", 4.0, 20.0), &[service("A", "Mulch", 50.0)]).unwrap();

        let amounts: Vec<Money> = invoice.line_items.iter().map(|l| l.amount).collect();
        assert_eq!(
            amounts,
            vec![
                Money::from_cents(8_000),
                Money::from_cents(5_000),
                Money::from_cents(1_300)
            ]
        );
        assert_eq!(invoice.subtotal, Money::from_cents(13_000));
        assert_eq!(invoice.fee_amount, Money::from_cents(1_300));
        assert_eq!(invoice.total, Money::from_cents(14_300));
    }

    #[test]
    fn line_order_is_labor_services_fee() {
        let services = vec![service("A", "Mulch", 50.0), service("A", "Edging", 25.0)];

        let invoice = assemble(&summary("A", 2.0, 50.0), &services).unwrap();

        let kinds: Vec<LineKind> = invoice.line_items.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LineKind::Labor, LineKind::Service, LineKind::Service, LineKind::Fee]
        );
        assert_eq!(invoice.line_items[1].description, "Mulch");
        assert_eq!(invoice.line_items[2].description, "Edging");
        let fee = invoice.line_items.last().unwrap();
        assert_eq!(fee.description, DEFAULT_FEE_LABEL);
        assert_eq!(fee.quantity, 1.0);
        assert_eq!(fee.unit_rate, 17.5);
    }

    #[test]
    fn filters_unbillable_services() {
        let mut included = service("A", "Included plants", 40.0);
        included.invoice_type = InvoiceType::Included;
        let mut invoiced = service("A", "Old charge", 30.0);
        invoiced.already_invoiced = true;
        let services = vec![
            service("A", "Zero", 0.0),
            included,
            invoiced,
            service("B", "Other site", 99.0),
            service("A", "Mulch", 10.0),
        ];

        let invoice = assemble(&summary("A", 1.0, 20.0), &services).unwrap();

        let descriptions: Vec<&str> = invoice
            .line_items
            .iter()
            .filter(|l| l.kind == LineKind::Service)
            .map(|l| l.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["Mulch"]);
    }

    #[test]
    fn service_amount_comes_from_total_price() {
        let mut mulch = service("A", "Mulch", 33.34);
        mulch.quantity = 3.0;
        mulch.unit_price = 11.11;

        let invoice = assemble(&summary("A", 0.0, 20.0), &[mulch]).unwrap();

        let line = &invoice.line_items[0];
        assert_eq!(line.kind, LineKind::Service);
        assert_eq!(line.quantity, 3.0);
        assert_eq!(line.unit_rate, 11.11);
        assert_eq!(line.amount, Money::from_cents(3_334));
    }

    #[test]
    fn skips_jobsite_with_nothing_to_bill() {
        let mut included = service("A", "Included", 40.0);
        included.invoice_type = InvoiceType::Included;

        assert!(assemble(&summary("A", 0.0, 20.0), &[included]).is_none());
        assert!(assemble(&summary("A", 0.0, 20.0), &[]).is_none());
    }

    #[test]
    fn services_only_invoice_has_no_labor_line() {
        let invoice = assemble(&summary("A", 0.0, 20.0), &[service("A", "Mulch", 50.0)]).unwrap();

        assert_eq!(invoice.line_items[0].kind, LineKind::Service);
        assert_eq!(invoice.subtotal, Money::from_cents(5_000));
    }

    #[test]
    fn hours_that_round_to_zero_have_no_labor_line() {
        assert!(assemble(&summary("A", 0.004, 20.0), &[]).is_none());

        let invoice = assemble(&summary("A", 0.004, 20.0), &[service("A", "Mulch", 50.0)]).unwrap();
        assert_eq!(invoice.line_items[0].kind, LineKind::Service);
        assert_eq!(invoice.subtotal, Money::from_cents(5_000));
    }

    #[test]
    fn labor_hours_round_to_two_decimals() {
        let invoice = assemble(&summary("A", 10.0 / 3.0, 75.0), &[]).unwrap();

        let labor = &invoice.line_items[0];
        assert_eq!(labor.quantity, 3.33);
        assert_eq!(labor.amount, Money::from_cents(24_975));
    }

    #[test]
    fn flat_fee_above_threshold() {
        let invoice = assemble(&summary("A", 40.0, 50.0), &[]).unwrap();

        assert_eq!(invoice.subtotal, Money::from_cents(200_000));
        assert_eq!(invoice.fee_amount, Money::from_cents(1_500));
        assert_eq!(invoice.total, Money::from_cents(201_500));
    }

    #[test]
    fn zero_rate_labor_has_no_fee_line() {
        let invoice = assemble(&summary("A", 2.0, 0.0), &[]).unwrap();

        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.total, Money::ZERO);
    }

    #[test]
    fn carries_jobsite_metadata() {
        let invoice = assemble(&summary("A", 1.0, 20.0), &[]).unwrap();

        assert_eq!(invoice.jobsite_name, "Site A");
        assert_eq!(invoice.customer_name, "Customer A");
        assert_eq!(invoice.invoice_date, date(2026, 1, 31));
        assert_eq!(invoice.timesheet_ids, vec!["T1".to_string()]);
    }

    #[test]
    fn labor_description_formats() {
        let label = DEFAULT_LABOR_LABEL;
        assert_eq!(
            format_labor_description(label, &BTreeSet::from([date(2026, 1, 5)])),
            "Skilled Garden Hourly Labor 1/05"
        );
        assert_eq!(
            format_labor_description(
                label,
                &BTreeSet::from([date(2026, 1, 7), date(2026, 1, 5), date(2026, 1, 6)])
            ),
            "Skilled Garden Hourly Labor 1/05-1/07"
        );
        assert_eq!(
            format_labor_description(label, &BTreeSet::new()),
            "Skilled Garden Hourly Labor"
        );
    }

    #[test]
    fn short_date_format() {
        assert_eq!(format_date_short(date(2026, 1, 5)), "1/05");
        assert_eq!(format_date_short(date(2026, 11, 24)), "11/24");
    }
}
