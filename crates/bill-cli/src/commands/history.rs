//! History command: invoices created by earlier runs.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use bill_core::{Money, format_date_short};
use bill_db::{Database, InvoiceHistoryRecord};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use serde::Serialize;

use super::util::truncate;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Only show invoices for this job site.
    #[arg(long)]
    pub jobsite: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// History row for display.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub jobsite_id: String,
    pub qbo_invoice_id: String,
    pub qbo_invoice_number: String,
    pub total: Money,
    pub timesheet_ids: Vec<String>,
    pub work_dates: Vec<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<InvoiceHistoryRecord> for HistoryEntry {
    fn from(record: InvoiceHistoryRecord) -> Self {
        Self {
            jobsite_id: record.jobsite_id,
            qbo_invoice_id: record.qbo_invoice_id,
            qbo_invoice_number: record.qbo_invoice_number,
            total: record.total,
            timesheet_ids: record.timesheet_ids,
            work_dates: record.work_dates.into_iter().collect(),
            created_at: record.created_at,
        }
    }
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &HistoryArgs) -> Result<()> {
    let entries: Vec<HistoryEntry> = db
        .invoice_history(args.jobsite.as_deref())?
        .into_iter()
        .map(HistoryEntry::from)
        .collect();

    if args.json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else {
        write!(writer, "{}", format_history(&entries))?;
    }
    Ok(())
}

/// Format history for human-readable output.
pub fn format_history(entries: &[HistoryEntry]) -> String {
    let mut output = String::new();

    if entries.is_empty() {
        writeln!(output, "No invoices recorded yet.").unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<16}  {:<10}  {:<12}  {:>10}  {:>10}  Work dates",
        "Created", "Invoice", "Jobsite", "Total", "Timesheets"
    )
    .unwrap();
    writeln!(
        output,
        "────────────────  ──────────  ────────────  ──────────  ──────────  ──────────"
    )
    .unwrap();
    for entry in entries {
        let number = if entry.qbo_invoice_number.is_empty() {
            &entry.qbo_invoice_id
        } else {
            &entry.qbo_invoice_number
        };
        writeln!(
            output,
            "{:<16}  {:<10}  {:<12}  {:>10}  {:>10}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M").to_string(),
            truncate(number, 10),
            truncate(&entry.jobsite_id, 12),
            entry.total.to_string(),
            entry.timesheet_ids.len(),
            date_range(&entry.work_dates)
        )
        .unwrap();
    }
    output
}

fn date_range(dates: &[NaiveDate]) -> String {
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) if first == last => format_date_short(*first),
        (Some(first), Some(last)) => {
            format!("{}-{}", format_date_short(*first), format_date_short(*last))
        }
        _ => "-".to_string(),
    }
}
