//! Readers for the LMN "Job History" CSV exports.
//!
//! Two exports feed a billing run: time data (one row per labor entry) and
//! service data (one row per material or service charge). Columns are
//! located by header name, so extra or reordered columns are fine.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use bill_core::{InvoiceType, ServiceRecord, TimeRecord};
use chrono::NaiveDate;
use csv::StringRecord;
use thiserror::Error;

const TIME_COLUMNS: [&str; 9] = [
    "TimesheetID",
    "JobsiteID",
    "Jobsite",
    "CustomerName",
    "TaskName",
    "CostCode",
    "Man Hours",
    "Billable Rate",
    "EndDate",
];

const SERVICE_COLUMNS: [&str; 11] = [
    "TimesheetID",
    "JobsiteID",
    "Jobsite",
    "CustomerName",
    "Service_Activity",
    "Timesheet Qty",
    "Invoice Type",
    "Unit Price",
    "Total Price",
    "Invoiced",
    "EndDate",
];

#[derive(Debug, Error)]
pub enum LmnError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("{export} export is missing required columns: {}", columns.join(", "))]
    MissingColumns {
        export: &'static str,
        columns: Vec<String>,
    },

    #[error("invalid date in row {row}: {value}")]
    InvalidDate { row: usize, value: String },
}

/// Loads the time data export.
pub fn load_time_records(path: &Path) -> Result<Vec<TimeRecord>, LmnError> {
    read_time_records(open(path)?)
}

/// Loads the service data export.
pub fn load_service_records(path: &Path) -> Result<Vec<ServiceRecord>, LmnError> {
    read_service_records(open(path)?)
}

fn open(path: &Path) -> Result<File, LmnError> {
    File::open(path).map_err(|source| LmnError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

pub fn read_time_records<R: Read>(reader: R) -> Result<Vec<TimeRecord>, LmnError> {
    let mut reader = csv_reader(reader);
    let headers = reader.headers()?.clone();
    let [
        timesheet,
        jobsite,
        jobsite_name,
        customer,
        task,
        cost_code,
        hours,
        rate,
        end_date,
    ] = require_columns(&headers, &TIME_COLUMNS, "time")?;

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = result?;
        let row_num = row_idx + 2;
        records.push(TimeRecord {
            timesheet_id: field(&row, timesheet).to_string(),
            jobsite_id: field(&row, jobsite).to_string(),
            jobsite_name: field(&row, jobsite_name).to_string(),
            customer_name: field(&row, customer).to_string(),
            task_name: field(&row, task).to_string(),
            cost_code: field(&row, cost_code).to_string(),
            hours: parse_number(field(&row, hours)),
            billable_rate: parse_number(field(&row, rate)),
            work_date: parse_date(field(&row, end_date), row_num)?,
        });
    }
    tracing::debug!(rows = records.len(), "read time export");
    Ok(records)
}

pub fn read_service_records<R: Read>(reader: R) -> Result<Vec<ServiceRecord>, LmnError> {
    let mut reader = csv_reader(reader);
    let headers = reader.headers()?.clone();
    let [
        timesheet,
        jobsite,
        _jobsite_name,
        _customer,
        activity,
        quantity,
        invoice_type,
        unit_price,
        total_price,
        invoiced,
        end_date,
    ] = require_columns(&headers, &SERVICE_COLUMNS, "service")?;

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = result?;
        let row_num = row_idx + 2;
        let invoice_type = match field(&row, invoice_type).parse::<InvoiceType>() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        };
        records.push(ServiceRecord {
            timesheet_id: field(&row, timesheet).to_string(),
            jobsite_id: field(&row, jobsite).to_string(),
            description: field(&row, activity).to_string(),
            quantity: parse_number(field(&row, quantity)),
            unit_price: parse_number(field(&row, unit_price)),
            total_price: parse_number(field(&row, total_price)),
            invoice_type,
            already_invoiced: parse_invoiced_flag(field(&row, invoiced)),
            work_date: parse_date(field(&row, end_date), row_num)?,
        });
    }
    tracing::debug!(rows = records.len(), "read service export");
    Ok(records)
}

/// Finds each required column, reporting every missing one at once.
fn require_columns<const N: usize>(
    headers: &StringRecord,
    required: &[&'static str; N],
    export: &'static str,
) -> Result<[usize; N], LmnError> {
    let mut indices = [0; N];
    let mut missing = Vec::new();
    for (slot, name) in indices.iter_mut().zip(required) {
        match headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}') == *name)
        {
            Some(index) => *slot = index,
            None => missing.push((*name).to_string()),
        }
    }
    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(LmnError::MissingColumns {
            export,
            columns: missing,
        })
    }
}

fn field(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or("")
}

/// Strips `$` and `,`; blank or unparseable values become zero.
fn parse_number(value: &str) -> f64 {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .unwrap_or(0.0)
}

fn parse_invoiced_flag(value: &str) -> bool {
    let value = value.trim();
    ["y", "yes", "true"]
        .iter()
        .any(|flag| value.eq_ignore_ascii_case(flag))
}

/// Accepts `YYYY-MM-DD` or `M/D/YYYY`, optionally followed by a time.
fn parse_date(value: &str, row: usize) -> Result<Option<NaiveDate>, LmnError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, fmt) {
            return Ok(Some(date));
        }
    }
    Err(LmnError::InvalidDate {
        row,
        value: value.to_string(),
    })
}
