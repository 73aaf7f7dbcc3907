//! Process command: create QuickBooks draft invoices for an export pair.
//!
//! Each invoice is checked before submission:
//! - the job site must map to a QuickBooks customer
//! - its timesheets and work dates must not appear on an earlier invoice
//!   (unless `--allow-duplicates`)
//!
//! Skips and failures are reported per invoice; one bad invoice never stops
//! the rest of the run.

use std::fmt::{self, Write as _};
use std::io::Write;

use anyhow::{Context, Result, bail};
use bill_core::{InvoiceDraft, Money, format_date_short};
use bill_db::{Database, NewInvoiceHistory};
use bill_qbo::{Client, ItemRef, build_invoice_payload};
use clap::Args;

use super::util::{
    ExportArgs, connect, load_drafts, open_database, resolve_mapping, runtime, truncate,
};
use crate::Config;
use crate::mapping::{CustomerMapping, unmapped_jobsites};

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub inputs: ExportArgs,

    /// Show what would be created without contacting QuickBooks.
    #[arg(long)]
    pub dry_run: bool,

    /// Create invoices even when their timesheets or dates were billed before.
    #[arg(long)]
    pub allow_duplicates: bool,
}

/// Whether an invoice goes to QuickBooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Submit { customer_id: String },
    Skip { reason: String },
}

/// What happened to one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created { doc_number: String, total: Money },
    WouldCreate { customer_id: String, total: Money },
    Skipped { reason: String },
    Failed { error: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { doc_number, total } => {
                write!(f, "created invoice #{doc_number} ({total})")
            }
            Self::WouldCreate { customer_id, total } => {
                write!(f, "would create for customer {customer_id} ({total})")
            }
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { error } => write!(f, "error: {error}"),
        }
    }
}

/// One line of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceResult {
    pub jobsite_id: String,
    pub jobsite_name: String,
    pub outcome: Outcome,
}

impl InvoiceResult {
    fn new(draft: &InvoiceDraft, outcome: Outcome) -> Self {
        Self {
            jobsite_id: draft.jobsite_id.clone(),
            jobsite_name: draft.jobsite_name.clone(),
            outcome,
        }
    }
}

pub fn run<W: Write>(writer: &mut W, args: &ProcessArgs, config: &Config) -> Result<()> {
    let drafts = load_drafts(&args.inputs, config)?;
    let mut db = open_database(config)?;
    let mapping = resolve_mapping(&db, config)?;

    let unmapped = unmapped_jobsites(drafts.iter().map(|d| d.jobsite_id.as_str()), &mapping);
    if !unmapped.is_empty() {
        tracing::warn!(jobsites = %unmapped.join(", "), "job sites without a customer mapping");
    }

    let decisions = drafts
        .iter()
        .map(|draft| decide(draft, &mapping, &db, args.allow_duplicates))
        .collect::<Result<Vec<_>>>()?;

    let has_work = decisions
        .iter()
        .any(|decision| matches!(decision, Decision::Submit { .. }));
    let results = if args.dry_run || !has_work {
        preview_results(&drafts, decisions)
    } else {
        runtime()?.block_on(async {
            let client = connect(&mut db, config).await?;
            anyhow::Ok(submit_all(&client, &mut db, &drafts, decisions, config).await)
        })?
    };

    write!(writer, "{}", format_summary(&results, args.dry_run))?;
    if !unmapped.is_empty() {
        write!(writer, "\n{}", format_unmapped(&unmapped))?;
    }

    let failed = results
        .iter()
        .filter(|result| matches!(result.outcome, Outcome::Failed { .. }))
        .count();
    if failed > 0 {
        bail!("{failed} invoice(s) failed");
    }
    Ok(())
}

/// Checks customer mapping and invoice history for one draft.
pub fn decide(
    draft: &InvoiceDraft,
    mapping: &CustomerMapping,
    db: &Database,
    allow_duplicates: bool,
) -> Result<Decision> {
    let Some(customer_id) = mapping.customer_id(&draft.jobsite_id) else {
        tracing::warn!(jobsite_id = %draft.jobsite_id, "no customer mapping, skipping");
        return Ok(Decision::Skip {
            reason: "no QuickBooks customer mapped".to_string(),
        });
    };

    if let Some(reason) = duplicate_reason(draft, db)? {
        tracing::warn!(jobsite_id = %draft.jobsite_id, %reason, "possible duplicate invoice");
        if !allow_duplicates {
            return Ok(Decision::Skip { reason });
        }
    }

    Ok(Decision::Submit {
        customer_id: customer_id.to_string(),
    })
}

fn duplicate_reason(draft: &InvoiceDraft, db: &Database) -> Result<Option<String>> {
    let invoiced = db.find_invoiced_timesheets(&draft.jobsite_id, &draft.timesheet_ids)?;
    if let Some(first) = invoiced.first() {
        let mut ids: Vec<&str> = invoiced.iter().map(|t| t.timesheet_id.as_str()).collect();
        ids.dedup();
        return Ok(Some(format!(
            "timesheets {} already on invoice #{}",
            ids.join(", "),
            first.qbo_invoice_number
        )));
    }

    let overlap = db.find_overlapping_dates(&draft.jobsite_id, &draft.work_dates)?;
    Ok(overlap.map(|overlap| {
        let dates: Vec<String> = overlap
            .overlapping_dates
            .iter()
            .map(|date| format_date_short(*date))
            .collect();
        format!(
            "work dates {} already billed on invoice #{}",
            dates.join(", "),
            overlap.qbo_invoice_number
        )
    }))
}

fn preview_results(drafts: &[InvoiceDraft], decisions: Vec<Decision>) -> Vec<InvoiceResult> {
    drafts
        .iter()
        .zip(decisions)
        .map(|(draft, decision)| {
            let outcome = match decision {
                Decision::Submit { customer_id } => Outcome::WouldCreate {
                    customer_id,
                    total: draft.total,
                },
                Decision::Skip { reason } => Outcome::Skipped { reason },
            };
            InvoiceResult::new(draft, outcome)
        })
        .collect()
}

/// Submits every cleared invoice in order and records the ones created.
pub async fn submit_all(
    client: &Client,
    db: &mut Database,
    drafts: &[InvoiceDraft],
    decisions: Vec<Decision>,
    config: &Config,
) -> Vec<InvoiceResult> {
    let item_ref = match config.qbo.labor_item_name.as_deref() {
        Some(name) => lookup_item(client, name).await,
        None => None,
    };

    let mut results = Vec::with_capacity(drafts.len());
    for (draft, decision) in drafts.iter().zip(decisions) {
        let customer_id = match decision {
            Decision::Submit { customer_id } => customer_id,
            Decision::Skip { reason } => {
                results.push(InvoiceResult::new(draft, Outcome::Skipped { reason }));
                continue;
            }
        };

        let payload = build_invoice_payload(
            draft,
            &customer_id,
            item_ref.as_ref(),
            config.qbo.payment_terms,
        );
        let outcome = match client.create_draft_invoice(&payload).await {
            Ok(created) => {
                let history = NewInvoiceHistory {
                    jobsite_id: draft.jobsite_id.clone(),
                    timesheet_ids: draft.timesheet_ids.clone(),
                    work_dates: draft.work_dates.clone(),
                    qbo_invoice_id: created.id.clone(),
                    qbo_invoice_number: created.doc_number.clone(),
                    total: created.total,
                };
                if let Err(err) = db.record_invoice(&history) {
                    tracing::warn!(
                        jobsite_id = %draft.jobsite_id,
                        invoice_id = %created.id,
                        error = %err,
                        "invoice created but history was not recorded"
                    );
                }
                let doc_number = if created.doc_number.is_empty() {
                    created.id
                } else {
                    created.doc_number
                };
                Outcome::Created {
                    doc_number,
                    total: created.total,
                }
            }
            Err(err) => {
                tracing::warn!(jobsite_id = %draft.jobsite_id, error = %err, "invoice failed");
                Outcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        results.push(InvoiceResult::new(draft, outcome));
    }
    results
}

async fn lookup_item(client: &Client, name: &str) -> Option<ItemRef> {
    match client.find_item_by_name(name).await {
        Ok(Some(item)) => Some(item),
        Ok(None) => {
            tracing::warn!(name, "labor item not found; lines will have no item");
            None
        }
        Err(err) => {
            tracing::warn!(name, error = %err, "labor item lookup failed");
            None
        }
    }
}

/// Format run results for human-readable output.
pub fn format_summary(results: &[InvoiceResult], dry_run: bool) -> String {
    let mut output = String::new();

    if dry_run {
        writeln!(output, "DRY RUN: nothing was sent to QuickBooks.").unwrap();
        writeln!(output).unwrap();
    }
    if results.is_empty() {
        writeln!(output, "No invoices to create.").unwrap();
        return output;
    }

    for result in results {
        writeln!(
            output,
            "{:<12}  {:<24}  {}",
            truncate(&result.jobsite_id, 12),
            truncate(&result.jobsite_name, 24),
            result.outcome
        )
        .unwrap();
    }

    let count = |pred: fn(&Outcome) -> bool| results.iter().filter(|r| pred(&r.outcome)).count();
    let skipped = count(|o| matches!(o, Outcome::Skipped { .. }));
    writeln!(output).unwrap();
    if dry_run {
        let would = count(|o| matches!(o, Outcome::WouldCreate { .. }));
        writeln!(output, "Would create: {would}  Skipped: {skipped}").unwrap();
    } else {
        let created = count(|o| matches!(o, Outcome::Created { .. }));
        let failed = count(|o| matches!(o, Outcome::Failed { .. }));
        writeln!(
            output,
            "Created: {created}  Skipped: {skipped}  Errors: {failed}"
        )
        .unwrap();
    }
    output
}

/// Lists job sites that still need a customer, with the commands to fix them.
pub fn format_unmapped(unmapped: &[&str]) -> String {
    let mut output = String::new();
    if unmapped.is_empty() {
        return output;
    }
    writeln!(output, "Unmapped job sites: {}", unmapped.join(", ")).unwrap();
    writeln!(
        output,
        "Hint: Find the customer with 'bill mapping search <name>', then run 'bill mapping set <jobsite> <customer>'."
    )
    .unwrap();
    output
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;

    use super::*;
    use bill_core::{LineItem, LineKind};
    use chrono::NaiveDate;
    use insta::assert_snapshot;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn draft(jobsite: &str, timesheets: &[&str], days: &[u32]) -> InvoiceDraft {
        InvoiceDraft {
            jobsite_id: jobsite.to_string(),
            jobsite_name: format!("Site {jobsite}"),
            customer_name: format!("Customer {jobsite}"),
            invoice_date: date(31),
            line_items: vec![LineItem {
                kind: LineKind::Labor,
                description: "Skilled Garden Hourly Labor 1/05".to_string(),
                quantity: 2.0,
                unit_rate: 20.0,
                amount: Money::from_cents(4_000),
            }],
            subtotal: Money::from_cents(4_000),
            fee_amount: Money::from_cents(400),
            total: Money::from_cents(4_400),
            timesheet_ids: timesheets.iter().map(ToString::to_string).collect(),
            work_dates: days.iter().copied().map(date).collect(),
        }
    }

    fn mapping(pairs: &[(&str, &str)]) -> CustomerMapping {
        let mut mapping = CustomerMapping::default();
        for (jobsite, customer) in pairs {
            mapping.insert(crate::mapping::CustomerEntry {
                jobsite_id: (*jobsite).to_string(),
                qbo_customer_id: (*customer).to_string(),
                qbo_display_name: String::new(),
                notes: String::new(),
            });
        }
        mapping
    }

    fn history(db: &mut Database, jobsite: &str, timesheets: &[&str], days: &[u32]) {
        db.record_invoice(&NewInvoiceHistory {
            jobsite_id: jobsite.to_string(),
            timesheet_ids: timesheets.iter().map(ToString::to_string).collect(),
            work_dates: days.iter().copied().map(date).collect::<BTreeSet<_>>(),
            qbo_invoice_id: "130".to_string(),
            qbo_invoice_number: "1037".to_string(),
            total: Money::from_cents(4_400),
        })
        .unwrap();
    }

    #[test]
    fn unmapped_jobsite_is_skipped() {
        let db = Database::open_in_memory().unwrap();

        let decision = decide(&draft("J100", &["5001"], &[5]), &mapping(&[]), &db, false).unwrap();

        assert_eq!(
            decision,
            Decision::Skip {
                reason: "no QuickBooks customer mapped".to_string()
            }
        );
    }

    #[test]
    fn invoiced_timesheets_are_skipped_unless_allowed() {
        let mut db = Database::open_in_memory().unwrap();
        history(&mut db, "J100", &["5001"], &[5]);
        let draft = draft("J100", &["5001", "5002"], &[6]);
        let mapping = mapping(&[("J100", "42")]);

        assert_eq!(
            decide(&draft, &mapping, &db, false).unwrap(),
            Decision::Skip {
                reason: "timesheets 5001 already on invoice #1037".to_string()
            }
        );
        assert_eq!(
            decide(&draft, &mapping, &db, true).unwrap(),
            Decision::Submit {
                customer_id: "42".to_string()
            }
        );
    }

    #[test]
    fn shared_timesheet_does_not_block_other_jobsite() {
        let mut db = Database::open_in_memory().unwrap();
        history(&mut db, "J100", &["5001"], &[5]);

        let decision = decide(
            &draft("J200", &["5001"], &[5]),
            &mapping(&[("J200", "77")]),
            &db,
            false,
        )
        .unwrap();

        assert_eq!(
            decision,
            Decision::Submit {
                customer_id: "77".to_string()
            }
        );
    }

    #[test]
    fn overlapping_work_dates_are_skipped() {
        let mut db = Database::open_in_memory().unwrap();
        history(&mut db, "J100", &["4999"], &[5, 6]);

        let decision = decide(
            &draft("J100", &["5001"], &[6, 7]),
            &mapping(&[("J100", "42")]),
            &db,
            false,
        )
        .unwrap();

        assert_eq!(
            decision,
            Decision::Skip {
                reason: "work dates 1/06 already billed on invoice #1037".to_string()
            }
        );
    }

    #[test]
    fn unmapped_hint_lists_every_jobsite() {
        assert_eq!(format_unmapped(&[]), "");
        assert_snapshot!(format_unmapped(&["J200", "J300"]), @r"
        Unmapped job sites: J200, J300
        Hint: Find the customer with 'bill mapping search <name>', then run 'bill mapping set <jobsite> <customer>'.
        ");
    }

    #[test]
    fn summary_snapshot() {
        let results = vec![
            InvoiceResult::new(
                &draft("J100", &[], &[]),
                Outcome::Created {
                    doc_number: "1037".to_string(),
                    total: Money::from_cents(14_300),
                },
            ),
            InvoiceResult::new(
                &draft("J200", &[], &[]),
                Outcome::Skipped {
                    reason: "no QuickBooks customer mapped".to_string(),
                },
            ),
            InvoiceResult::new(
                &draft("J300", &[], &[]),
                Outcome::Failed {
                    error: "API error: Customer is inactive".to_string(),
                },
            ),
        ];

        assert_snapshot!(format_summary(&results, false), @r"
        J100          Site J100                 created invoice #1037 ($143.00)
        J200          Site J200                 skipped: no QuickBooks customer mapped
        J300          Site J300                 error: API error: Customer is inactive

        Created: 1  Skipped: 1  Errors: 1
        ");
    }

    fn write_exports(dir: &Path) -> ExportArgs {
        let time = dir.join("time.csv");
        let services = dir.join("services.csv");
        fs::write(
            &time,
            "TimesheetID,JobsiteID,Jobsite,CustomerName,TaskName,CostCode,Man Hours,Billable Rate,EndDate\n\
             5001,J100,Maple Court,Acme HOA,Pruning,200 Grounds,3,20,2026-01-05\n\
             5001,J200,Oak Row,Oak Row LLC,Planting,200 Grounds,1,20,2026-01-05\n\
             5001,J100,Maple Court,Acme HOA,Drive,900 Overhead,2,20,2026-01-05\n",
        )
        .unwrap();
        fs::write(
            &services,
            "TimesheetID,JobsiteID,Jobsite,CustomerName,Service_Activity,Timesheet Qty,Invoice Type,Unit Price,Total Price,Invoiced,EndDate\n\
             5001,J100,Maple Court,Acme HOA,Mulch,2,Fixed,$25.00,$50.00,N,2026-01-05\n",
        )
        .unwrap();
        ExportArgs {
            time,
            services,
            date: Some(date(31)),
        }
    }

    fn config_in(dir: &Path) -> Config {
        Config {
            database_path: dir.join("bill.db"),
            mapping_path: dir.join("customer_mapping.csv"),
            ..Config::default()
        }
    }

    #[test]
    fn dry_run_reports_without_recording() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        fs::write(
            &config.mapping_path,
            "JobsiteID,QBO_CustomerID,QBO_DisplayName,Notes\nJ100,42,Acme HOA,\n",
        )
        .unwrap();
        let args = ProcessArgs {
            inputs: write_exports(temp.path()),
            dry_run: true,
            allow_duplicates: false,
        };

        let mut out = Vec::new();
        run(&mut out, &args, &config).unwrap();

        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        DRY RUN: nothing was sent to QuickBooks.

        J100          Maple Court               would create for customer 42 ($143.00)
        J200          Oak Row                   skipped: no QuickBooks customer mapped

        Would create: 1  Skipped: 1

        Unmapped job sites: J200
        Hint: Find the customer with 'bill mapping search <name>', then run 'bill mapping set <jobsite> <customer>'.
        ");
        let db = Database::open(&config.database_path).unwrap();
        assert!(db.invoice_history(None).unwrap().is_empty());
    }

    #[test]
    fn missing_credentials_fail_before_submitting() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        fs::write(
            &config.mapping_path,
            "JobsiteID,QBO_CustomerID,QBO_DisplayName,Notes\nJ100,42,Acme HOA,\n",
        )
        .unwrap();
        let args = ProcessArgs {
            inputs: write_exports(temp.path()),
            dry_run: false,
            allow_duplicates: false,
        };

        let mut out = Vec::new();
        let err = run(&mut out, &args, &config).unwrap_err();

        assert!(err.to_string().contains("credentials"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn submit_records_created_invoices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/company/9130/invoice"))
            .and(header("authorization", "Bearer token"))
            .and(body_partial_json(json!({
                "CustomerRef": {"value": "42"},
                "PrivateNote": "Created from LMN export. JobsiteID: J100"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Invoice": {"Id": "131", "DocNumber": "1038", "TotalAmt": 44.0}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client =
            Client::with_base_url("token", "9130", format!("{}/v3/company", server.uri())).unwrap();
        let mut db = Database::open_in_memory().unwrap();
        let drafts = vec![draft("J100", &["5001"], &[5]), draft("J200", &["5002"], &[5])];
        let decisions = vec![
            Decision::Submit {
                customer_id: "42".to_string(),
            },
            Decision::Skip {
                reason: "no QuickBooks customer mapped".to_string(),
            },
        ];

        let results = submit_all(&client, &mut db, &drafts, decisions, &Config::default()).await;

        assert_eq!(
            results[0].outcome,
            Outcome::Created {
                doc_number: "1038".to_string(),
                total: Money::from_cents(4_400),
            }
        );
        assert!(matches!(results[1].outcome, Outcome::Skipped { .. }));
        let history = db.invoice_history(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].jobsite_id, "J100");
        assert_eq!(history[0].qbo_invoice_number, "1038");
        assert_eq!(history[0].timesheet_ids, vec!["5001".to_string()]);
    }
}
