//! Storage layer for the billing tool.
//!
//! Provides persistence for invoice history, customer mapping overrides,
//! and the accounting system's OAuth tokens using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` can be moved between threads but not shared without a `Mutex`.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with a `Z` suffix
//! (e.g., `2026-01-15T10:30:00Z`), so lexicographic order is chronological.
//!
//! ## List Columns
//!
//! `invoice_history.timesheet_ids` and `invoice_history.work_dates` hold JSON
//! arrays of strings. Work dates use `YYYY-MM-DD`.
//!
//! ## Money
//!
//! Invoice totals are stored as integer cents in `total_cents`.

use std::collections::BTreeSet;
use std::path::Path;

use bill_core::Money;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A JSON list column could not be encoded or decoded.
    #[error("invalid list column for invoice {invoice}: {source}")]
    ListColumn {
        invoice: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored date or timestamp failed to parse.
    #[error("invalid date for invoice {invoice}: {value}")]
    DateParse { invoice: String, value: String },
    /// A stored token expiry failed to parse.
    #[error("invalid token expiry for realm {realm_id}: {value}")]
    TokenExpiry { realm_id: String, value: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// An invoice that was just created in the accounting system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoiceHistory {
    pub jobsite_id: String,
    pub timesheet_ids: Vec<String>,
    pub work_dates: BTreeSet<NaiveDate>,
    pub qbo_invoice_id: String,
    pub qbo_invoice_number: String,
    pub total: Money,
}

/// A stored invoice history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceHistoryRecord {
    pub id: i64,
    pub jobsite_id: String,
    pub timesheet_ids: Vec<String>,
    pub work_dates: BTreeSet<NaiveDate>,
    pub qbo_invoice_id: String,
    pub qbo_invoice_number: String,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

/// A timesheet that already appears on an earlier invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicedTimesheet {
    pub timesheet_id: String,
    pub qbo_invoice_id: String,
    pub qbo_invoice_number: String,
    pub created_at: DateTime<Utc>,
}

/// Work dates shared with an earlier invoice for the same job site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOverlap {
    pub overlapping_dates: BTreeSet<NaiveDate>,
    pub qbo_invoice_number: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth tokens for one accounting company.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("realm_id", &self.realm_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Manual jobsite → accounting customer mapping that wins over the CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerOverride {
    pub jobsite_id: String,
    pub qbo_customer_id: String,
    pub qbo_display_name: String,
    pub notes: String,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS invoice_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                jobsite_id TEXT NOT NULL,
                timesheet_ids TEXT NOT NULL,
                work_dates TEXT NOT NULL,
                qbo_invoice_id TEXT NOT NULL,
                qbo_invoice_number TEXT NOT NULL DEFAULT '',
                total_cents INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_invoice_history_jobsite ON invoice_history(jobsite_id);
            CREATE INDEX IF NOT EXISTS idx_invoice_history_created ON invoice_history(created_at);

            CREATE TABLE IF NOT EXISTS customer_mapping_overrides (
                jobsite_id TEXT PRIMARY KEY,
                qbo_customer_id TEXT NOT NULL,
                qbo_display_name TEXT NOT NULL DEFAULT '',
                notes TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS qbo_tokens (
                realm_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                refresh_expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ========== Invoice History ==========

    /// Records an invoice created in the accounting system.
    ///
    /// Only call this after the remote creation succeeded.
    pub fn record_invoice(&mut self, invoice: &NewInvoiceHistory) -> Result<i64, DbError> {
        self.record_invoice_at(invoice, Utc::now())
    }

    /// Records an invoice with an explicit creation time.
    pub fn record_invoice_at(
        &mut self,
        invoice: &NewInvoiceHistory,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let list_error = |source| DbError::ListColumn {
            invoice: invoice.qbo_invoice_id.clone(),
            source,
        };
        let timesheet_ids = serde_json::to_string(&invoice.timesheet_ids).map_err(list_error)?;
        let work_dates: Vec<String> = invoice.work_dates.iter().map(format_date).collect();
        let work_dates = serde_json::to_string(&work_dates).map_err(list_error)?;

        self.conn.execute(
            "
            INSERT INTO invoice_history
            (jobsite_id, timesheet_ids, work_dates, qbo_invoice_id, qbo_invoice_number, total_cents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                invoice.jobsite_id,
                timesheet_ids,
                work_dates,
                invoice.qbo_invoice_id,
                invoice.qbo_invoice_number,
                invoice.total.cents(),
                format_timestamp(created_at),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, jobsite_id = %invoice.jobsite_id, "recorded invoice history");
        Ok(id)
    }

    /// Lists invoice history, newest first, optionally for a single job site.
    pub fn invoice_history(
        &self,
        jobsite_id: Option<&str>,
    ) -> Result<Vec<InvoiceHistoryRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, jobsite_id, timesheet_ids, work_dates, qbo_invoice_id,
                   qbo_invoice_number, total_cents, created_at
            FROM invoice_history
            WHERE ?1 IS NULL OR jobsite_id = ?1
            ORDER BY created_at DESC, id DESC
            ",
        )?;
        let rows = stmt.query_map([jobsite_id], |row| {
            Ok(RawHistoryRow {
                id: row.get(0)?,
                jobsite_id: row.get(1)?,
                timesheet_ids: row.get(2)?,
                work_dates: row.get(3)?,
                qbo_invoice_id: row.get(4)?,
                qbo_invoice_number: row.get(5)?,
                total_cents: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?.decode()?);
        }
        Ok(history)
    }

    /// Finds which of `timesheet_ids` were billed on an earlier invoice for
    /// `jobsite_id`.
    ///
    /// A timesheet spans several job sites, so invoices for other job sites
    /// are ignored. Results follow the order of `timesheet_ids`; a timesheet
    /// billed more than once is reported for each invoice, newest first.
    pub fn find_invoiced_timesheets(
        &self,
        jobsite_id: &str,
        timesheet_ids: &[String],
    ) -> Result<Vec<InvoicedTimesheet>, DbError> {
        if timesheet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let history = self.invoice_history(Some(jobsite_id))?;
        let mut found = Vec::new();
        for timesheet_id in timesheet_ids {
            for record in &history {
                if record.timesheet_ids.contains(timesheet_id) {
                    found.push(InvoicedTimesheet {
                        timesheet_id: timesheet_id.clone(),
                        qbo_invoice_id: record.qbo_invoice_id.clone(),
                        qbo_invoice_number: record.qbo_invoice_number.clone(),
                        created_at: record.created_at,
                    });
                }
            }
        }
        Ok(found)
    }

    /// Returns the most recent earlier invoice for `jobsite_id` that shares
    /// any of `work_dates`.
    pub fn find_overlapping_dates(
        &self,
        jobsite_id: &str,
        work_dates: &BTreeSet<NaiveDate>,
    ) -> Result<Option<DateOverlap>, DbError> {
        if work_dates.is_empty() {
            return Ok(None);
        }
        let overlap = self
            .invoice_history(Some(jobsite_id))?
            .into_iter()
            .find_map(|record| {
                let overlapping: BTreeSet<NaiveDate> =
                    record.work_dates.intersection(work_dates).copied().collect();
                (!overlapping.is_empty()).then(|| DateOverlap {
                    overlapping_dates: overlapping,
                    qbo_invoice_number: record.qbo_invoice_number,
                    created_at: record.created_at,
                })
            });
        Ok(overlap)
    }

    // ========== Customer Mapping Overrides ==========

    /// Lists every override ordered by job site ID.
    pub fn customer_overrides(&self) -> Result<Vec<CustomerOverride>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT jobsite_id, qbo_customer_id, qbo_display_name, notes
            FROM customer_mapping_overrides
            ORDER BY jobsite_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CustomerOverride {
                jobsite_id: row.get(0)?,
                qbo_customer_id: row.get(1)?,
                qbo_display_name: row.get(2)?,
                notes: row.get(3)?,
            })
        })?;
        let mut overrides = Vec::new();
        for row in rows {
            overrides.push(row?);
        }
        Ok(overrides)
    }

    /// Inserts or replaces the override for a job site.
    pub fn save_customer_override(&mut self, mapping: &CustomerOverride) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO customer_mapping_overrides
            (jobsite_id, qbo_customer_id, qbo_display_name, notes, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(jobsite_id) DO UPDATE SET
                qbo_customer_id = excluded.qbo_customer_id,
                qbo_display_name = excluded.qbo_display_name,
                notes = excluded.notes,
                updated_at = excluded.updated_at
            ",
            params![
                mapping.jobsite_id,
                mapping.qbo_customer_id,
                mapping.qbo_display_name,
                mapping.notes,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Deletes the override for a job site. Returns whether a row was removed.
    pub fn delete_customer_override(&mut self, jobsite_id: &str) -> Result<bool, DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM customer_mapping_overrides WHERE jobsite_id = ?",
            [jobsite_id],
        )?;
        Ok(deleted > 0)
    }

    /// Looks up the override for one job site.
    pub fn customer_override(&self, jobsite_id: &str) -> Result<Option<CustomerOverride>, DbError> {
        let mapping = self
            .conn
            .query_row(
                "
                SELECT jobsite_id, qbo_customer_id, qbo_display_name, notes
                FROM customer_mapping_overrides
                WHERE jobsite_id = ?
                ",
                [jobsite_id],
                |row| {
                    Ok(CustomerOverride {
                        jobsite_id: row.get(0)?,
                        qbo_customer_id: row.get(1)?,
                        qbo_display_name: row.get(2)?,
                        notes: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(mapping)
    }

    // ========== OAuth Tokens ==========

    /// Stores the latest tokens for a company, replacing earlier ones.
    pub fn save_tokens(&mut self, tokens: &StoredTokens) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO qbo_tokens
            (realm_id, access_token, refresh_token, expires_at, refresh_expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(realm_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                refresh_expires_at = excluded.refresh_expires_at,
                updated_at = excluded.updated_at
            ",
            params![
                tokens.realm_id,
                tokens.access_token,
                tokens.refresh_token,
                format_timestamp(tokens.expires_at),
                format_timestamp(tokens.refresh_expires_at),
                format_timestamp(Utc::now()),
            ],
        )?;
        tracing::debug!(realm_id = %tokens.realm_id, "saved tokens");
        Ok(())
    }

    /// Loads the stored tokens for a company.
    pub fn tokens(&self, realm_id: &str) -> Result<Option<StoredTokens>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT access_token, refresh_token, expires_at, refresh_expires_at
                FROM qbo_tokens
                WHERE realm_id = ?
                ",
                [realm_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((access_token, refresh_token, expires_at, refresh_expires_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredTokens {
            realm_id: realm_id.to_string(),
            access_token,
            refresh_token,
            expires_at: parse_token_timestamp(realm_id, expires_at)?,
            refresh_expires_at: parse_token_timestamp(realm_id, refresh_expires_at)?,
        }))
    }
}

struct RawHistoryRow {
    id: i64,
    jobsite_id: String,
    timesheet_ids: String,
    work_dates: String,
    qbo_invoice_id: String,
    qbo_invoice_number: String,
    total_cents: i64,
    created_at: String,
}

impl RawHistoryRow {
    fn decode(self) -> Result<InvoiceHistoryRecord, DbError> {
        let invoice = self.qbo_invoice_id.clone();
        let list_error = |source| DbError::ListColumn {
            invoice: invoice.clone(),
            source,
        };
        let timesheet_ids: Vec<String> =
            serde_json::from_str(&self.timesheet_ids).map_err(list_error)?;
        let raw_dates: Vec<String> = serde_json::from_str(&self.work_dates).map_err(list_error)?;
        let work_dates = raw_dates
            .into_iter()
            .map(|value| {
                NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| DbError::DateParse {
                    invoice: invoice.clone(),
                    value,
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| DbError::DateParse {
                invoice: invoice.clone(),
                value: self.created_at.clone(),
            })?;

        Ok(InvoiceHistoryRecord {
            id: self.id,
            jobsite_id: self.jobsite_id,
            timesheet_ids,
            work_dates,
            qbo_invoice_id: self.qbo_invoice_id,
            qbo_invoice_number: self.qbo_invoice_number,
            total: Money::from_cents(self.total_cents),
            created_at,
        })
    }
}

fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_token_timestamp(realm_id: &str, value: String) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::TokenExpiry {
            realm_id: realm_id.to_string(),
            value,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}
